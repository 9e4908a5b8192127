// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use std::io::Write;

use nl2sql_guard::{
    dialect::SqlDialect,
    guardrail::GuardrailConfig,
    schema::{DdlSchemaProvider, SchemaProvider, SchemaSnapshot}
};
use tempfile::NamedTempFile;

const RETAIL_DDL: &str = r#"
    CREATE TABLE products (product_id INT, name VARCHAR(100), price INT);
    CREATE TABLE orders (order_id INT, customer_id INT);
    CREATE TABLE audit_log (id INT, entry TEXT);
    CREATE INDEX idx_orders_customer ON orders(customer_id);
"#;

#[test]
fn test_parse_ddl_tables() {
    let snapshot = SchemaSnapshot::parse_ddl(RETAIL_DDL, SqlDialect::Generic).unwrap();
    assert_eq!(snapshot.tables.len(), 3);
    let products = &snapshot.tables["PRODUCTS"];
    assert_eq!(products.name, "products");
    assert_eq!(products.columns.len(), 3);
    assert_eq!(products.columns[1].name, "name");
    assert_eq!(products.columns[1].data_type, "VARCHAR(100)");
}

#[test]
fn test_parse_ddl_invalid() {
    assert!(SchemaSnapshot::parse_ddl("CREATE TABLE (", SqlDialect::Generic).is_err());
}

#[test]
fn test_summary_is_sorted_one_line_per_table() {
    let snapshot = SchemaSnapshot::from_columns([
        ("ORDERS", "ORDER_ID", "NUMBER"),
        ("CUSTOMERS", "CUSTOMER_ID", "NUMBER"),
        ("ORDERS", "TOTAL", "NUMBER")
    ]);
    assert_eq!(
        snapshot.to_summary(),
        "CUSTOMERS(CUSTOMER_ID:NUMBER)\nORDERS(ORDER_ID:NUMBER, TOTAL:NUMBER)"
    );
}

#[test]
fn test_retain_allowed() {
    let mut snapshot = SchemaSnapshot::parse_ddl(RETAIL_DDL, SqlDialect::Generic).unwrap();
    snapshot.retain_allowed(&GuardrailConfig::with_allowed_tables(["PRODUCTS", "ORDERS"]));
    let names: Vec<&str> = snapshot.tables.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["ORDERS", "PRODUCTS"]);
}

#[tokio::test]
async fn test_ddl_provider_restricts_to_whitelist() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", RETAIL_DDL).unwrap();

    let provider = DdlSchemaProvider::new(file.path(), SqlDialect::Generic)
        .restricted_to(GuardrailConfig::with_allowed_tables(["PRODUCTS"]));
    let snapshot = provider.load_schema().await.unwrap();
    assert_eq!(
        snapshot.to_summary(),
        "products(product_id:INT, name:VARCHAR(100), price:INT)"
    );
}

#[tokio::test]
async fn test_ddl_provider_missing_file() {
    let provider = DdlSchemaProvider::new("/nonexistent/schema.sql", SqlDialect::Generic);
    assert!(provider.load_schema().await.is_err());
}

#[tokio::test]
async fn test_ddl_provider_without_allowed_tables() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", RETAIL_DDL).unwrap();

    let provider = DdlSchemaProvider::new(file.path(), SqlDialect::Generic)
        .restricted_to(GuardrailConfig::with_allowed_tables(["CUSTOMERS"]));
    assert!(provider.load_schema().await.is_err());
}

#[tokio::test]
async fn test_snapshot_is_its_own_provider() {
    let snapshot = SchemaSnapshot::from_columns([("PRODUCTS", "NAME", "TEXT")]);
    assert_eq!(snapshot.load_schema().await.unwrap(), snapshot);
}
