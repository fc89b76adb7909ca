//! SQL Server command set.
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
    quote_open: "[",
    quote_close: "]",
    length_fn: "DATALENGTH",
};

pub fn commands(naming: &TableNaming) -> CommandSet {
    let table = GRAMMAR.qualify(naming);
    let updates = UPDATABLE_COLUMNS
        .iter()
        .map(|column| {
            let param = GRAMMAR.param(column.trim_start_matches("kvle_"));
            format!("{column} = {param}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let parts = DialectParts {
        insert_or_update_entry: format!(
            "UPDATE {table} SET {updates} \
             WHERE kvle_partition = @partition AND kvle_key = @key; \
             IF @@ROWCOUNT = 0 \
             INSERT INTO {table} ({cols}) VALUES ({params});",
            cols = column_list(),
            params = param_list(&GRAMMAR),
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
    let object = match &naming.schema {
        Some(schema) => format!("{schema}.{}", naming.table),
        None => naming.table.clone(),
    };
    format!("SELECT name FROM sys.columns WHERE object_id = OBJECT_ID('{object}')")
}

fn create_schema(naming: &TableNaming) -> Vec<String> {
    let table = GRAMMAR.qualify(naming);
    let parent_columns = (0..MAX_PARENT_KEYS)
        .map(|slot| format!("    kvle_parent_key{slot} NVARCHAR(255),"))
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
             \x20   kvle_partition NVARCHAR(255) NOT NULL,\n\
             \x20   kvle_key NVARCHAR(255) NOT NULL,\n\
             \x20   kvle_expiry BIGINT NOT NULL,\n\
             \x20   kvle_interval BIGINT NOT NULL,\n\
             \x20   kvle_value VARBINARY(MAX) NOT NULL,\n\
             \x20   kvle_compressed BIT NOT NULL,\n\
             \x20   kvle_creation BIGINT NOT NULL,\n\
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
    fn upsert_is_update_then_conditional_insert() {
        let commands = commands(&TableNaming::default());
        let upsert = &commands.insert_or_update_entry;
        assert!(upsert.starts_with("UPDATE [kvle_entries] SET"));
        assert!(upsert.contains("IF @@ROWCOUNT = 0"));
        assert!(upsert.contains("kvle_value = @value"));
        // Only the insert arm carries the creation instant.
        assert!(!upsert.contains("kvle_creation = @creation"));
    }

    #[test]
    fn identifiers_use_brackets() {
        let commands = commands(&TableNaming::with_schema("dbo", "entries"));
        assert!(commands.peek_entry.contains("[dbo].[entries]"));
        assert!(commands.table_columns.contains("OBJECT_ID('dbo.entries')"));
    }

    #[test]
    fn size_uses_datalength() {
        let commands = commands(&TableNaming::default());
        assert!(commands.cache_size_bytes.contains("DATALENGTH(kvle_value)"));
    }

    #[test]
    fn ddl_declares_cascading_parents_and_no_vacuum() {
        let commands = commands(&TableNaming::default());
        assert_eq!(
            commands.create_schema[0].matches("ON DELETE CASCADE").count(),
            MAX_PARENT_KEYS
        );
        assert!(commands.vacuum.is_none());
    }
}
