diesel::table! {
    blocks (rowid) {
        rowid -> BigInt,
        height -> BigInt,
        chain_id -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tx_results (rowid) {
        rowid -> BigInt,
        block_id -> BigInt,
        height -> BigInt,
        index -> Integer,
        created_at -> Timestamptz,
        tx_hash -> Varchar,
        tx_result -> Bytea,
    }
}

diesel::table! {
    events (rowid) {
        rowid -> BigInt,
        block_id -> BigInt,
        tx_id -> Nullable<BigInt>,
        #[sql_name = "type"]
        event_type -> Varchar,
    }
}

diesel::table! {
    attributes (event_id, key) {
        event_id -> BigInt,
        key -> Varchar,
        composite_key -> Varchar,
        value -> Varchar,
    }
}

diesel::joinable!(tx_results -> blocks (block_id));
diesel::joinable!(events -> blocks (block_id));
diesel::joinable!(events -> tx_results (tx_id));
diesel::joinable!(attributes -> events (event_id));
diesel::allow_tables_to_appear_in_same_query!(blocks, tx_results, events, attributes);
