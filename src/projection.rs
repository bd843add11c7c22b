//! Projection Builder (spec §4.2).
//!
//! Per-column CSV and INSERT select expressions, grounded on
//! `mysql_lib.py`'s `get_column_metadata` CASE expressions
//! (`column_csv`/`column_select`) and `generate_select`.

use crate::types::HexifySet;

/// CSV-mode expression for one column: hex-encode if the type is in the
/// hexify set, cast-to-unsigned for `bit`, otherwise a quoted identifier.
/// NULL handling and quote-escaping are applied by `wrap_row_as_csv`,
/// which operates over the whole row the way `generate_select` does.
pub fn build_csv_expr(column: &str, declared_type: &str, hexify: &HexifySet) -> String {
    if hexify.contains(declared_type) {
        format!("hex(`{column}`)")
    } else if declared_type == "bit" {
        format!("cast(`{column}` AS unsigned)")
    } else {
        format!("`{column}`")
    }
}

/// INSERT-mode expression for one column. Identical to the CSV
/// expression except the `bit` cast is re-aliased back to the column
/// name so a parameterless `SELECT ... FROM t` still yields a row the
/// fallback insert path can address by column name.
pub fn build_insert_expr(column: &str, declared_type: &str, hexify: &HexifySet) -> String {
    if hexify.contains(declared_type) {
        format!("hex(`{column}`)")
    } else if declared_type == "bit" {
        format!("cast(`{column}` AS unsigned) AS `{column}`")
    } else {
        format!("`{column}`")
    }
}

/// Build the full `SELECT <csv-projection> FROM ...` column list for
/// CSV mode: each column wrapped with NULL-to-sentinel coalescing and
/// quote-escaping, concatenated into one quoted-CSV-row expression,
/// with the sentinel finally rewritten back to an unquoted SQL NULL so
/// the target's bulk loader treats it as NULL rather than the literal
/// string "NULL". Mirrors `generate_select(mode="csv")` exactly.
pub fn csv_row_select(csv_exprs: &[String]) -> String {
    let wrapped: Vec<String> = csv_exprs
        .iter()
        .map(|expr| format!("COALESCE(REPLACE({expr}, '\"', '\"\"'), 'NULL')"))
        .collect();
    format!(
        "REPLACE(CONCAT('\"', CONCAT_WS('\",\"', {}), '\"'), '\"NULL\"', 'NULL')",
        wrapped.join(", ")
    )
}

/// Build the plain comma-separated column list for INSERT mode.
pub fn insert_row_select(insert_exprs: &[String]) -> String {
    insert_exprs.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hexify() -> HexifySet {
        HexifySet::new(["blob".to_string(), "binary".to_string()])
    }

    #[test]
    fn hexify_type_uses_hex_function() {
        assert_eq!(build_csv_expr("payload", "blob", &hexify()), "hex(`payload`)");
        assert_eq!(build_insert_expr("payload", "blob", &hexify()), "hex(`payload`)");
    }

    #[test]
    fn bit_type_casts_to_unsigned() {
        assert_eq!(build_csv_expr("flags", "bit", &hexify()), "cast(`flags` AS unsigned)");
        assert_eq!(
            build_insert_expr("flags", "bit", &hexify()),
            "cast(`flags` AS unsigned) AS `flags`"
        );
    }

    #[test]
    fn plain_type_is_quoted_identifier() {
        assert_eq!(build_csv_expr("name", "varchar", &hexify()), "`name`");
        assert_eq!(build_insert_expr("name", "varchar", &hexify()), "`name`");
    }

    #[test]
    fn insert_row_select_joins_with_commas() {
        let exprs = vec!["`id`".to_string(), "`name`".to_string()];
        assert_eq!(insert_row_select(&exprs), "`id`, `name`");
    }

    #[test]
    fn csv_row_select_wraps_and_rewrites_null_sentinel() {
        let exprs = vec!["`id`".to_string(), "`name`".to_string()];
        let sql = csv_row_select(&exprs);
        assert!(sql.contains("CONCAT_WS('\",\"'"));
        assert!(sql.ends_with("'\"NULL\"', 'NULL')"));
    }
}
