//! Oracle command set.
//!
//! No driver is bundled; pair these commands with your own adapter through
//! [`DriverConnectionFactory`](super::DriverConnectionFactory). Identifiers
//! are left unquoted so Oracle's case folding applies uniformly; adapters
//! must report column names in lowercase.

use crate::entry::MAX_PARENT_KEYS;

use super::{
    build_command_set, column_list, CommandSet, DialectParts, Grammar, TableNaming, COLUMNS,
    UPDATABLE_COLUMNS,
};

pub const GRAMMAR: Grammar = Grammar {
    param_prefix: ":",
    quote_open: "",
    quote_close: "",
    length_fn: "DBMS_LOB.GETLENGTH",
};

pub fn commands(naming: &TableNaming) -> CommandSet {
    let table = GRAMMAR.qualify(naming);
    let source_columns = COLUMNS
        .iter()
        .map(|column| {
            let param = GRAMMAR.param(column.trim_start_matches("kvle_"));
            format!("{param} AS {column}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let matched_updates = UPDATABLE_COLUMNS
        .iter()
        .map(|column| format!("t.{column} = s.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_values = COLUMNS
        .iter()
        .map(|column| format!("s.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    let parts = DialectParts {
        insert_or_update_entry: format!(
            "MERGE INTO {table} t \
             USING (SELECT {source_columns} FROM dual) s \
             ON (t.kvle_partition = s.kvle_partition AND t.kvle_key = s.kvle_key) \
             WHEN MATCHED THEN UPDATE SET {matched_updates} \
             WHEN NOT MATCHED THEN INSERT ({cols}) VALUES ({insert_values})",
            cols = column_list(),
        ),
        cache_size_bytes: format!(
            "SELECT COALESCE(SUM({len}(kvle_value)), 0) AS cache_size_bytes FROM {table}",
            len = GRAMMAR.length_fn,
        ),
        table_columns: table_columns(naming),
        create_schema: create_schema(naming),
        vacuum: None,
    };
    build_command_set(&GRAMMAR, naming, parts)
}

fn table_columns(naming: &TableNaming) -> String {
    match &naming.schema {
        Some(schema) => format!(
            "SELECT LOWER(column_name) AS column_name FROM all_tab_columns \
             WHERE owner = UPPER('{schema}') AND table_name = UPPER('{}')",
            naming.table
        ),
        None => format!(
            "SELECT LOWER(column_name) AS column_name FROM user_tab_columns \
             WHERE table_name = UPPER('{}')",
            naming.table
        ),
    }
}

fn create_schema(naming: &TableNaming) -> Vec<String> {
    let table = GRAMMAR.qualify(naming);
    let parent_columns = (0..MAX_PARENT_KEYS)
        .map(|slot| format!("    kvle_parent_key{slot} VARCHAR2(255),"))
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
            "CREATE TABLE {table} (\n\
             \x20   kvle_partition VARCHAR2(255) NOT NULL,\n\
             \x20   kvle_key VARCHAR2(255) NOT NULL,\n\
             \x20   kvle_expiry NUMBER(19) NOT NULL,\n\
             \x20   kvle_interval NUMBER(19) NOT NULL,\n\
             \x20   kvle_value BLOB NOT NULL,\n\
             \x20   kvle_compressed NUMBER(1) NOT NULL,\n\
             \x20   kvle_creation NUMBER(19) NOT NULL,\n\
             {parent_columns}\n\
             \x20   CONSTRAINT pk_{name} PRIMARY KEY (kvle_partition, kvle_key),\n\
             {foreign_keys}\n\
             )",
            name = naming.table
        ),
        format!(
            "CREATE INDEX ix_{}_expiry_partition \
             ON {table} (kvle_expiry DESC, kvle_partition ASC)",
            naming.table
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_is_a_merge_from_dual() {
        let commands = commands(&TableNaming::default());
        let upsert = &commands.insert_or_update_entry;
        assert!(upsert.starts_with("MERGE INTO kvle_entries t"));
        assert!(upsert.contains("FROM dual"));
        assert!(upsert.contains(":partition AS kvle_partition"));
        assert!(upsert.contains("WHEN MATCHED THEN UPDATE SET"));
        assert!(upsert.contains("WHEN NOT MATCHED THEN INSERT"));
        assert!(!upsert.contains("t.kvle_creation = s.kvle_creation"));
    }

    #[test]
    fn identifiers_are_unquoted() {
        let commands = commands(&TableNaming::with_schema("cache", "entries"));
        assert!(commands.peek_entry.contains("FROM cache.entries"));
    }

    #[test]
    fn probe_folds_names_to_lowercase() {
        let commands = commands(&TableNaming::default());
        assert!(commands.table_columns.contains("LOWER(column_name)"));
        assert!(commands.table_columns.contains("UPPER('kvle_entries')"));
    }

    #[test]
    fn size_uses_lob_length() {
        let commands = commands(&TableNaming::default());
        assert!(commands
            .cache_size_bytes
            .contains("DBMS_LOB.GETLENGTH(kvle_value)"));
    }
}
