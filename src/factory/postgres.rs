//! PostgreSQL command set.
//!
//! No driver is bundled; pair these commands with your own adapter through
//! [`DriverConnectionFactory`](super::DriverConnectionFactory). Adapters must
//! report column names in lowercase, as created by the DDL here.

use crate::entry::MAX_PARENT_KEYS;

use super::{
    build_command_set, column_list, excluded_update_list, param_list, CommandSet, DialectParts,
    Grammar, TableNaming,
};

pub const GRAMMAR: Grammar = Grammar {
    param_prefix: "$",
    quote_open: "\"",
    quote_close: "\"",
    length_fn: "LENGTH",
};

pub fn commands(naming: &TableNaming) -> CommandSet {
    let table = GRAMMAR.qualify(naming);
    let parts = DialectParts {
        insert_or_update_entry: format!(
            "INSERT INTO {table} ({cols}) VALUES ({params}) \
             ON CONFLICT (kvle_partition, kvle_key) DO UPDATE SET {updates}",
            cols = column_list(),
            params = param_list(&GRAMMAR),
            updates = excluded_update_list(),
        ),
        cache_size_bytes: format!(
            "SELECT COALESCE(SUM({len}(kvle_value)), 0) AS cache_size_bytes FROM {table}",
            len = GRAMMAR.length_fn,
        ),
        table_columns: table_columns(naming),
        create_schema: create_schema(naming),
        vacuum: Some("VACUUM".to_string()),
    };
    build_command_set(&GRAMMAR, naming, parts)
}

fn table_columns(naming: &TableNaming) -> String {
    let schema_filter = match &naming.schema {
        Some(schema) => format!("'{schema}'"),
        None => "current_schema()".to_string(),
    };
    format!(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = '{}' AND table_schema = {schema_filter}",
        naming.table
    )
}

fn create_schema(naming: &TableNaming) -> Vec<String> {
    let table = GRAMMAR.qualify(naming);
    let parent_columns = (0..MAX_PARENT_KEYS)
        .map(|slot| format!("    kvle_parent_key{slot} VARCHAR(255),"))
        .collect::<Vec<_>>()
        .join("\n");
    let foreign_keys = (0..MAX_PARENT_KEYS)
        .map(|slot| {
            format!(
                "    CONSTRAINT fk_{}_parent{slot} \
                 FOREIGN KEY (kvle_partition, kvle_parent_key{slot}) \
                 REFERENCES {table} (kvle_partition, kvle_key) ON DELETE CASCADE",
                naming.table
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n\
             \x20   kvle_partition VARCHAR(255) NOT NULL,\n\
             \x20   kvle_key VARCHAR(255) NOT NULL,\n\
             \x20   kvle_expiry BIGINT NOT NULL,\n\
             \x20   kvle_interval BIGINT NOT NULL,\n\
             \x20   kvle_value BYTEA NOT NULL,\n\
             \x20   kvle_compressed BOOLEAN NOT NULL,\n\
             \x20   kvle_creation BIGINT NOT NULL,\n\
             {parent_columns}\n\
             \x20   PRIMARY KEY (kvle_partition, kvle_key),\n\
             {foreign_keys}\n\
             )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS ix_{}_expiry_partition \
             ON {table} (kvle_expiry DESC, kvle_partition ASC)",
            naming.table
        ),
    ]
}
