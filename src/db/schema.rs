diesel::table! {
    users (user_id) {
        user_id -> BigInt,
        total_karma -> BigInt,
        upvotes_received -> BigInt,
        downvotes_received -> BigInt,
    }
}

diesel::table! {
    votes (id) {
        id -> BigInt,
        voter_id -> BigInt,
        message_id -> BigInt,
        author_id -> BigInt,
        vote_type -> BigInt,
        created_at -> Text,
    }
}

diesel::table! {
    debate_bans (id) {
        id -> BigInt,
        user_id -> BigInt,
        thread_id -> Nullable<BigInt>,
        banned_by -> BigInt,
        reason -> Nullable<Text>,
        expires_at -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    ban_history (id) {
        id -> BigInt,
        user_id -> BigInt,
        thread_id -> Nullable<BigInt>,
        banned_by -> BigInt,
        reason -> Nullable<Text>,
        expires_at -> Nullable<Text>,
        created_at -> Text,
        removed_at -> Nullable<Text>,
        removed_by -> Nullable<BigInt>,
        removal_reason -> Nullable<Text>,
    }
}

diesel::table! {
    closure_history (id) {
        id -> BigInt,
        thread_id -> BigInt,
        thread_name -> Text,
        closed_by -> BigInt,
        reason -> Nullable<Text>,
        created_at -> Text,
        reopened_at -> Nullable<Text>,
        reopened_by -> Nullable<BigInt>,
    }
}

diesel::table! {
    appeals (id) {
        id -> BigInt,
        user_id -> BigInt,
        action_type -> Text,
        action_id -> BigInt,
        reason -> Text,
        additional_context -> Nullable<Text>,
        status -> Text,
        reviewed_by -> Nullable<BigInt>,
        reviewed_at -> Nullable<Text>,
        denial_reason -> Nullable<Text>,
        case_message_id -> Nullable<BigInt>,
        created_at -> Text,
    }
}

diesel::table! {
    debate_counter (id) {
        id -> BigInt,
        counter -> BigInt,
    }
}

diesel::table! {
    debate_threads (thread_id) {
        thread_id -> BigInt,
        analytics_message_id -> Nullable<BigInt>,
        created_at -> Text,
    }
}

diesel::table! {
    debate_participation (id) {
        id -> BigInt,
        thread_id -> BigInt,
        user_id -> BigInt,
        message_count -> BigInt,
        created_at -> Text,
    }
}

diesel::table! {
    case_logs (user_id) {
        user_id -> BigInt,
        case_id -> BigInt,
        thread_id -> BigInt,
        last_unban_at -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    scheduler_state (name) {
        name -> Text,
        is_running -> Bool,
        updated_at -> Text,
    }
}

diesel::table! {
    schema_version (id) {
        id -> BigInt,
        version -> BigInt,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    users,
    votes,
    debate_bans,
    ban_history,
    closure_history,
    appeals,
    debate_counter,
    debate_threads,
    debate_participation,
    case_logs,
    scheduler_state,
    schema_version,
);
