//! CSV export and import of items.
//!
//! Archives carry a `data.csv` next to `data.json` so a backup stays readable in a
//! spreadsheet, and older archives that only have the CSV can still be restored.

use serde_json::{Map, Value};

use crate::item::{Item, format_number, generate_item_id, parse_leading_float};

/// Column order for exported CSV.
pub const CSV_HEADERS: [&str; 15] = [
    "id",
    "type",
    "name",
    "price",
    "msrp",
    "quantity",
    "purchaseDate",
    "status",
    "category",
    "channel",
    "storeName",
    "note",
    "link",
    "usageCount",
    "priceHistory",
];

const NUMERIC_COLUMNS: [&str; 4] = ["price", "msrp", "quantity", "usageCount"];

/// Export items as CSV, every field quoted. No byte-order mark is added.
pub fn export_csv(items: &[Item]) -> String {
    let mut out = CSV_HEADERS.join(",");
    for item in items {
        out.push('\n');
        let row: Vec<String> = CSV_HEADERS
            .iter()
            .map(|header| quote(&field_value(item, header)))
            .collect();
        out.push_str(&row.join(","));
    }
    out
}

fn field_value(item: &Item, header: &str) -> String {
    match header {
        "id" => item.id.clone(),
        "type" => item.item_type.to_string(),
        "name" => item.name.clone(),
        "price" => format_number(item.price),
        "msrp" => format_number(item.msrp),
        "quantity" => item.quantity.to_string(),
        "purchaseDate" => item.purchase_date.clone(),
        "status" => item.status.clone(),
        "category" => item.category.clone(),
        "channel" => item.channel.clone(),
        "storeName" => item.store_name.clone(),
        "note" => item.note.clone(),
        "link" => item.link.clone(),
        "usageCount" => item.usage_count.to_string(),
        "priceHistory" => serde_json::to_string(&item.price_history).unwrap_or_default(),
        _ => String::new(),
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Parse CSV text into raw item records.
///
/// The header row names the fields. Numeric columns that don't parse become 0,
/// `priceHistory` is parsed as JSON (invalid becomes `[]`), a missing id is generated and a
/// missing category becomes `other`. Records still go through
/// [`normalize_record`](crate::item::normalize_record) before use.
pub fn import_csv(text: &str) -> Vec<Value> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = parse_rows(text).into_iter();
    let Some(headers) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();

    let mut records = Vec::new();
    for row in rows {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let mut record = Map::new();
        for (idx, header) in headers.iter().enumerate() {
            let cell = row.get(idx).cloned().unwrap_or_default();
            let value = if NUMERIC_COLUMNS.contains(&header.as_str()) {
                let number = parse_leading_float(&cell).unwrap_or(0.0);
                serde_json::Number::from_f64(number).map_or(Value::from(0), Value::Number)
            } else if header == "priceHistory" {
                match serde_json::from_str::<Value>(&cell) {
                    Ok(Value::Array(points)) => Value::Array(points),
                    _ => Value::Array(Vec::new()),
                }
            } else {
                Value::String(cell)
            };
            record.insert(header.clone(), value);
        }
        if record
            .get("id")
            .and_then(Value::as_str)
            .is_none_or(str::is_empty)
        {
            record.insert("id".to_string(), Value::String(generate_item_id()));
        }
        if record
            .get("category")
            .and_then(Value::as_str)
            .is_none_or(str::is_empty)
        {
            record.insert("category".to_string(), Value::String("other".to_string()));
        }
        records.push(Value::Object(record));
    }
    records
}

/// Split CSV text into rows of cells.
/// Quoted cells may contain commas, newlines and doubled quotes.
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    cell.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => cell.push(ch),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            _ => cell.push(ch),
        }
    }
    if !cell.is_empty() || !row.is_empty() {
        row.push(cell);
        rows.push(row);
    }
    rows
}
