//! Terminal rendering of key records

use chrono::{DateTime, Utc};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use redis_admin_core::{DecodedValue, KeyRecord};
use redis_admin_redis::{Column, ServerAdmin, format_duration};
use serde_json::{Map, Value, json};

/// The list view as a table
pub fn records_table(records: &[KeyRecord], crop_size: usize, now: DateTime<Utc>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(Column::LIST_DISPLAY.iter().map(Column::name));

    for record in records {
        table.add_row(
            Column::LIST_DISPLAY
                .iter()
                .map(|column| column.render(record, crop_size, now)),
        );
    }
    table
}

/// One JSON object per record, keyed by column name
pub fn record_json(record: &KeyRecord, crop_size: usize, now: DateTime<Utc>) -> Value {
    let mut row = Map::new();
    for column in Column::LIST_DISPLAY {
        let value = match column {
            Column::Json => Value::Bool(record.is_json),
            Column::Base64 => Value::Bool(record.is_base64),
            other => Value::String(other.render(record, crop_size, now)),
        };
        row.insert(column.name().to_string(), value);
    }
    Value::Object(row)
}

/// Full detail of one record, value included uncropped
pub fn record_detail(record: &KeyRecord, now: DateTime<Utc>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let value = match record.decoded_value() {
        Some(DecodedValue::Empty) => String::new(),
        Some(DecodedValue::Text(text)) => text.clone(),
        Some(decoded) => serde_json::to_string_pretty(decoded)
            .unwrap_or_else(|_| record.display_value()),
        None => record.display_value(),
    };

    let rows = [
        ("key", record.key.clone()),
        ("type", record.key_type.to_string()),
        (
            "expires_at",
            record
                .expires_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default(),
        ),
        (
            "ttl",
            record.ttl_at(now).map(format_duration).unwrap_or_default(),
        ),
        (
            "idle",
            record.idle_at(now).map(format_duration).unwrap_or_default(),
        ),
        ("json", record.is_json.to_string()),
        ("base64", record.is_base64.to_string()),
        ("value", value),
    ];
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }
    table
}

/// Configured servers and how they are reached
pub fn servers_table(admins: &[ServerAdmin], targets: &[String]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["server", "name", "plural", "per page", "target"]);

    for (admin, target) in admins.iter().zip(targets) {
        table.add_row(vec![
            admin.name().to_string(),
            admin.verbose_name().to_string(),
            admin.verbose_name_plural().to_string(),
            admin.list_per_page().to_string(),
            target.clone(),
        ]);
    }
    table
}

/// Summary line printed under a list
pub fn page_summary(shown: usize, offset: usize, has_more: bool) -> Value {
    json!({
        "offset": offset,
        "shown": shown,
        "has_more": has_more,
    })
}
