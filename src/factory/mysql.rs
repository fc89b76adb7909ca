//! MySQL command set.
//!
//! No driver is bundled; pair these commands with your own adapter through
//! [`DriverConnectionFactory`](super::DriverConnectionFactory). Adapters must
//! report column names in lowercase, as created by the DDL here.

use crate::entry::MAX_PARENT_KEYS;

use super::{
    build_command_set, column_list, param_list, CommandSet, DialectParts, Grammar, TableNaming,
    UPDATABLE_COLUMNS,
};

pub const GRAMMAR: Grammar = Grammar {
    param_prefix: "@",
    quote_open: "`",
    quote_close: "`",
    length_fn: "LENGTH",
};

pub fn commands(naming: &TableNaming) -> CommandSet {
    let table = GRAMMAR.qualify(naming);
    let updates = UPDATABLE_COLUMNS
        .iter()
        .map(|column| format!("{column} = VALUES({column})"))
        .collect::<Vec<_>>()
        .join(", ");
    let parts = DialectParts {
        insert_or_update_entry: format!(
            "INSERT INTO {table} ({cols}) VALUES ({params}) \
             ON DUPLICATE KEY UPDATE {updates}",
            cols = column_list(),
            params = param_list(&GRAMMAR),
        ),
        cache_size_bytes: format!(
            "SELECT COALESCE(SUM({len}(kvle_value)), 0) AS cache_size_bytes FROM {table}",
            len = GRAMMAR.length_fn,
        ),
        table_columns: table_columns(naming),
        create_schema: create_schema(naming),
        vacuum: Some(format!("OPTIMIZE TABLE {table}")),
    };
    build_command_set(&GRAMMAR, naming, parts)
}

fn table_columns(naming: &TableNaming) -> String {
    let schema_filter = match &naming.schema {
        Some(schema) => format!("'{schema}'"),
        None => "DATABASE()".to_string(),
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
    vec![format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n\
         \x20   kvle_partition VARCHAR(255) NOT NULL,\n\
         \x20   kvle_key VARCHAR(255) NOT NULL,\n\
         \x20   kvle_expiry BIGINT NOT NULL,\n\
         \x20   kvle_interval BIGINT NOT NULL,\n\
         \x20   kvle_value LONGBLOB NOT NULL,\n\
         \x20   kvle_compressed TINYINT(1) NOT NULL,\n\
         \x20   kvle_creation BIGINT NOT NULL,\n\
         {parent_columns}\n\
         \x20   PRIMARY KEY (kvle_partition, kvle_key),\n\
         \x20   INDEX ix_{name}_expiry_partition (kvle_expiry DESC, kvle_partition ASC),\n\
         {foreign_keys}\n\
         ) ENGINE=InnoDB",
        name = naming.table
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_uses_on_duplicate_key() {
        let commands = commands(&TableNaming::default());
        let upsert = &commands.insert_or_update_entry;
        assert!(upsert.contains("ON DUPLICATE KEY UPDATE"));
        assert!(upsert.contains("kvle_value = VALUES(kvle_value)"));
        assert!(upsert.contains("@partition"));
        assert!(!upsert.contains("kvle_creation = VALUES(kvle_creation)"));
    }

    #[test]
    fn identifiers_use_backticks() {
        let commands = commands(&TableNaming::default());
        assert!(commands.peek_entry.contains("`kvle_entries`"));
    }

    #[test]
    fn default_schema_probe_uses_current_database() {
        let commands = commands(&TableNaming::default());
        assert!(commands.table_columns.contains("DATABASE()"));
    }

    #[test]
    fn ddl_is_innodb_with_inline_index_and_cascades() {
        let commands = commands(&TableNaming::default());
        let table = &commands.create_schema[0];
        assert!(table.ends_with("ENGINE=InnoDB"));
        assert!(table.contains("INDEX ix_kvle_entries_expiry_partition"));
        assert_eq!(table.matches("ON DELETE CASCADE").count(), MAX_PARENT_KEYS);
    }

    #[test]
    fn vacuum_optimizes_the_table() {
        let commands = commands(&TableNaming::default());
        assert_eq!(
            commands.vacuum.as_deref(),
            Some("OPTIMIZE TABLE `kvle_entries`")
        );
    }
}
