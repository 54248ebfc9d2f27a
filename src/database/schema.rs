// Mirrors the tables created by `connections::SCHEMA`.
//
// Timestamps use `TimestamptzSqlite` rather than `Timestamp` due to
// https://github.com/diesel-rs/diesel/issues/3320

diesel::table! {
    identities (id) {
        id -> Text,
        certificate -> Binary,
        private_key -> Binary,
        created_at -> TimestamptzSqlite,
    }
}

diesel::table! {
    devices (id) {
        id -> Text,
        display_name -> Text,
        protocol -> Text,
        enrolled_at -> TimestamptzSqlite,
        enrolled_by -> Text,
        hardware_id -> Nullable<Text>,
        mac_addresses -> Text,
        windows_device_id -> Text,
        device_type -> Nullable<Text>,
        enrollment_type -> Text,
        os_edition -> Nullable<Text>,
        os_version -> Nullable<Text>,
        application_version -> Nullable<Text>,
        certificate_subject -> Text,
        certificate_hash -> Text,
        certificate_not_before -> TimestamptzSqlite,
        certificate_not_after -> TimestamptzSqlite,
    }
}

diesel::table! {
    settings (id) {
        id -> Text,
        document -> Text,
        updated_at -> TimestamptzSqlite,
    }
}

diesel::table! {
    users (email) {
        email -> Text,
        password_hash -> Text,
        created_at -> TimestamptzSqlite,
    }
}

diesel::allow_tables_to_appear_in_same_query!(identities, devices, settings, users,);
