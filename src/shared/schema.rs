diesel::table! {
    tickets (id) {
        id -> Uuid,
        title -> Varchar,
        description -> Nullable<Text>,
        category -> Nullable<Varchar>,
        priority -> Varchar,
        status -> Varchar,
        creator_id -> Uuid,
        assignee_id -> Nullable<Uuid>,
        policy_id -> Nullable<Uuid>,
        due_at -> Nullable<Timestamptz>,
        resolved_at -> Nullable<Timestamptz>,
        escalated_to -> Nullable<Varchar>,
        escalation_kind -> Nullable<Varchar>,
        version -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sla_policies (id) {
        id -> Uuid,
        name -> Varchar,
        priority -> Varchar,
        response_time_hours -> Int4,
        resolution_time_hours -> Int4,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    // dedupe_key carries a unique index; notification inserts rely on it.
    notifications (id) {
        id -> Uuid,
        user_id -> Uuid,
        ticket_id -> Uuid,
        title -> Varchar,
        message -> Text,
        kind -> Varchar,
        dedupe_key -> Varchar,
        is_read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(tickets -> sla_policies (policy_id));

diesel::allow_tables_to_appear_in_same_query!(tickets, sla_policies, notifications);
