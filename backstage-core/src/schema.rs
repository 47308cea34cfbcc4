use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    backstage_users (id) {
        id -> Text,
        display_name -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    backstage_device_tokens (id) {
        id -> BigInt,
        user_id -> Text,
        device_id -> Text,
        token -> Text,
        platform -> Text,
        token_type -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    backstage_conversations (id) {
        id -> Text,
        operator_id -> Text,
        client_id -> Text,
        status -> Text,
        last_message_text -> Nullable<Text>,
        last_message_sender -> Nullable<Text>,
        last_message_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    backstage_conversation_unread (conversation_id, user_id) {
        conversation_id -> Text,
        user_id -> Text,
        unread_count -> BigInt,
    }
}

table! {
    backstage_messages (id) {
        id -> Text,
        conversation_id -> Text,
        sender_id -> Text,
        sender_role -> Text,
        body -> Text,
        status -> Text,
        is_system -> Bool,
        created_at -> Timestamptz,
    }
}

joinable!(backstage_device_tokens -> backstage_users (user_id));
joinable!(backstage_messages -> backstage_conversations (conversation_id));
joinable!(backstage_conversation_unread -> backstage_conversations (conversation_id));

allow_tables_to_appear_in_same_query!(
    backstage_users,
    backstage_device_tokens,
    backstage_conversations,
    backstage_conversation_unread,
    backstage_messages,
);
