table! {
    event_store (id) {
        id -> Int8,
        event -> Jsonb,
        status -> Varchar,
        attempt_count -> Int4,
        created_at -> Timestamp,
        status_updated_at -> Timestamp,
        event_key -> Nullable<Varchar>,
    }
}

table! {
    investor_paybacks (project_id, user_id) {
        project_id -> Int4,
        user_id -> Int4,
        transaction_id -> Int8,
        created_at -> Timestamp,
    }
}

table! {
    organizations (id) {
        id -> Int4,
        name -> Varchar,
        owner_id -> Int4,
        balance -> Numeric,
        org_type -> Varchar,
        is_banned -> Bool,
        created_at -> Timestamp,
    }
}

table! {
    payments (id) {
        id -> Uuid,
        external_id -> Varchar,
        entity_kind -> Varchar,
        entity_id -> Int4,
        amount -> Numeric,
        status -> Varchar,
        confirmation_url -> Nullable<Varchar>,
        transaction_id -> Nullable<Int8>,
        initiated_by -> Nullable<Int4>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    projects (id) {
        id -> Int4,
        name -> Varchar,
        creator_org_id -> Int4,
        current_money -> Numeric,
        wanted_money -> Numeric,
        duration_days -> Int4,
        created_at -> Timestamp,
        monetization_type -> Varchar,
        percent -> Numeric,
        is_completed -> Bool,
        is_public -> Bool,
        is_banned -> Bool,
        payback_started -> Bool,
        payback_started_at -> Nullable<Timestamp>,
        money_required_to_payback -> Numeric,
    }
}

table! {
    transactions (id) {
        id -> Int8,
        from_kind -> Varchar,
        from_id -> Int4,
        to_kind -> Varchar,
        to_id -> Int4,
        kind -> Varchar,
        amount -> Numeric,
        created_at -> Timestamp,
        cum_sum_of_sender -> Nullable<Numeric>,
        cum_sum_of_receiver -> Nullable<Numeric>,
        idempotency_key -> Nullable<Varchar>,
        initiated_by -> Nullable<Int4>,
    }
}

table! {
    user_right_at_org (org_id, user_id) {
        org_id -> Int4,
        user_id -> Int4,
        org_account_management -> Bool,
        money_management -> Bool,
        project_management -> Bool,
    }
}

table! {
    users (id) {
        id -> Int4,
        balance -> Numeric,
        is_banned -> Bool,
        is_admin -> Bool,
        created_at -> Timestamp,
    }
}

table! {
    withdrawals (id) {
        id -> Uuid,
        external_id -> Nullable<Varchar>,
        entity_kind -> Varchar,
        entity_id -> Int4,
        amount -> Numeric,
        destination -> Varchar,
        status -> Varchar,
        debit_transaction_id -> Int8,
        refund_transaction_id -> Nullable<Int8>,
        initiated_by -> Nullable<Int4>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

joinable!(investor_paybacks -> projects (project_id));
joinable!(investor_paybacks -> transactions (transaction_id));
joinable!(investor_paybacks -> users (user_id));
joinable!(organizations -> users (owner_id));
joinable!(projects -> organizations (creator_org_id));
joinable!(user_right_at_org -> organizations (org_id));
joinable!(user_right_at_org -> users (user_id));

allow_tables_to_appear_in_same_query!(
    event_store,
    investor_paybacks,
    organizations,
    payments,
    projects,
    transactions,
    user_right_at_org,
    users,
    withdrawals,
);
