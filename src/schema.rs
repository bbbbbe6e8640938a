table! {
    roles (id) {
        id -> Int4,
        name -> Varchar,
        color -> Varchar,
    }
}

table! {
    users (id) {
        id -> Int8,
        token -> Bpchar,
        username -> Varchar,
        display_name -> Varchar,
        password -> Varchar,
        role_id -> Int4,
    }
}

table! {
    parking_posts (id) {
        id -> Int8,
        created_by -> Nullable<Int8>,
        location -> Varchar,
        post_type -> Varchar,
        content -> Varchar,
        amt_slots -> Int4,
        created_at -> Int8,
    }
}

table! {
    parking_ratings (id) {
        id -> Int8,
        post_id -> Int8,
        user_id -> Nullable<Int8>,
        rating -> Int2,
        comment -> Nullable<Varchar>,
    }
}

table! {
    threads (id) {
        id -> Int8,
        user_id -> Int8,
        title -> Varchar,
        content -> Varchar,
        parent_id -> Nullable<Int8>,
        created_at -> Int8,
        up_votes -> Int4,
        down_votes -> Int4,
        flags -> Int4,
    }
}

table! {
    content_reports (id) {
        id -> Int8,
        user_id -> Int8,
        thread_id -> Int8,
        comment -> Varchar,
        created_at -> Int8,
    }
}

table! {
    crime_reports (id) {
        id -> Int8,
        user_id -> Int8,
        title -> Varchar,
        category -> Varchar,
        location -> Varchar,
        description -> Varchar,
        created_at -> Int8,
        is_emergency -> Bool,
        status -> Varchar,
    }
}

table! {
    notifications (id) {
        id -> Int8,
        user_id -> Int8,
        by_role_id -> Int4,
        title -> Varchar,
        content -> Varchar,
        created_at -> Int8,
        category -> Varchar,
        status -> Varchar,
    }
}

joinable!(users -> roles (role_id));
joinable!(parking_posts -> users (created_by));
joinable!(parking_ratings -> parking_posts (post_id));
joinable!(parking_ratings -> users (user_id));
joinable!(threads -> users (user_id));
joinable!(content_reports -> threads (thread_id));
joinable!(content_reports -> users (user_id));
joinable!(crime_reports -> users (user_id));
joinable!(notifications -> users (user_id));
joinable!(notifications -> roles (by_role_id));

allow_tables_to_appear_in_same_query!(
    roles,
    users,
    parking_posts,
    parking_ratings,
    threads,
    content_reports,
    crime_reports,
    notifications,
);
