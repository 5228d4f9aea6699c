//! CSV snapshot loaders for records, entities and claim documents.
//!
//! Header problems fail the whole file. A row that cannot be parsed is
//! skipped, logged and counted.

use chrono::NaiveDate;
use log::{debug, warn};

use crate::chain::ClaimDocuments;
use crate::error::ReconError;
use crate::gstin::{is_valid, normalize_id};
use crate::model::{Entity, EntityStatus, Record, SourceTag, TaxComponents};

#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub rows: Vec<T>,
    pub skipped: usize,
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"];

struct Table {
    file: String,
    headers: Vec<String>,
    reader: csv::Reader<std::io::Cursor<Vec<u8>>>,
}

impl Table {
    fn open(file: &str, csv_data: &str) -> Result<Self, ReconError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(std::io::Cursor::new(csv_data.as_bytes().to_vec()));
        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        Ok(Self {
            file: file.to_string(),
            headers,
            reader,
        })
    }

    fn idx(&self, name: &str) -> Result<usize, ReconError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ReconError::Io(format!("{}: missing column '{name}'", self.file)))
    }

    fn optional_idx(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

fn field<'a>(row: &'a csv::StringRecord, idx: usize) -> &'a str {
    row.get(idx).unwrap_or("")
}

/// Blank is not a value: the row is incomplete.
fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Filers leave the heads that do not apply blank, so blank reads as zero.
fn parse_tax_component(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return Some(0.0);
    }
    parse_amount(raw)
}

/// Undecodable rows count as skipped instead of failing the whole file.
fn next_row(
    file: &str,
    line: usize,
    row: Result<csv::StringRecord, csv::Error>,
    skipped: &mut usize,
) -> Option<csv::StringRecord> {
    match row {
        Ok(row) => Some(row),
        Err(e) => {
            warn!("{}: row {} unreadable ({}); skipped", file, line + 2, e);
            *skipped += 1;
            None
        }
    }
}

fn parse_optional_amount(raw: &str) -> Result<Option<f64>, ()> {
    if raw.is_empty() {
        return Ok(None);
    }
    parse_amount(raw).map(Some).ok_or(())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn parse_source(raw: &str) -> Option<SourceTag> {
    match raw.to_ascii_lowercase().as_str() {
        "seller_filed" | "a" | "gstr1" => Some(SourceTag::SellerFiled),
        "buyer_filed" | "b" | "gstr2b" => Some(SourceTag::BuyerFiled),
        _ => None,
    }
}

fn parse_status(raw: &str) -> Option<EntityStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "" | "active" => Some(EntityStatus::Active),
        "suspended" => Some(EntityStatus::Suspended),
        "cancelled" | "canceled" => Some(EntityStatus::Cancelled),
        _ => None,
    }
}

/// Columns: record_id, invoice_number, issuer_id, receiver_id, date,
/// taxable_amount, cgst, sgst, igst, declared_rate, source.
pub fn load_records(file: &str, csv_data: &str) -> Result<Loaded<Record>, ReconError> {
    let mut table = Table::open(file, csv_data)?;
    let record_id = table.idx("record_id")?;
    let invoice = table.idx("invoice_number")?;
    let issuer = table.idx("issuer_id")?;
    let receiver = table.idx("receiver_id")?;
    let date = table.idx("date")?;
    let amount = table.idx("taxable_amount")?;
    let cgst = table.idx("cgst")?;
    let sgst = table.idx("sgst")?;
    let igst = table.idx("igst")?;
    let rate = table.idx("declared_rate")?;
    let source = table.idx("source")?;

    let mut rows = Vec::new();
    let mut skipped = 0;
    for (line, row) in table.reader.records().enumerate() {
        let Some(row) = next_row(&table.file, line, row, &mut skipped) else {
            continue;
        };
        let id = field(&row, record_id).to_string();
        let parsed = (|| {
            Some(Record {
                record_id: id.clone(),
                invoice_number: field(&row, invoice).to_string(),
                issuer_id: normalize_id(field(&row, issuer)),
                receiver_id: normalize_id(field(&row, receiver)),
                date: parse_date(field(&row, date))?,
                taxable_amount: parse_amount(field(&row, amount))?,
                tax: TaxComponents {
                    cgst: parse_tax_component(field(&row, cgst))?,
                    sgst: parse_tax_component(field(&row, sgst))?,
                    igst: parse_tax_component(field(&row, igst))?,
                },
                declared_rate: parse_amount(field(&row, rate))?,
                source: parse_source(field(&row, source))?,
            })
        })();
        match parsed {
            Some(r) => rows.push(r),
            None => {
                warn!("{}: row {} ({}) could not be parsed; skipped", table.file, line + 2, id);
                skipped += 1;
            }
        }
    }
    Ok(Loaded { rows, skipped })
}

/// Columns: entity_id, and optionally status, compliance_rating.
pub fn load_entities(file: &str, csv_data: &str) -> Result<Loaded<Entity>, ReconError> {
    let mut table = Table::open(file, csv_data)?;
    let entity_id = table.idx("entity_id")?;
    let status = table.optional_idx("status");
    let rating = table.optional_idx("compliance_rating");

    let mut rows = Vec::new();
    let mut skipped = 0;
    for (line, row) in table.reader.records().enumerate() {
        let Some(row) = next_row(&table.file, line, row, &mut skipped) else {
            continue;
        };
        let id = normalize_id(field(&row, entity_id));
        if !is_valid(&id) {
            debug!("{}: {} is not a well-formed registration id", table.file, id);
        }
        let mut entity = Entity::new(id.clone());
        let status = status.map(|i| parse_status(field(&row, i))).unwrap_or(Some(EntityStatus::Active));
        let rating = match rating.map(|i| field(&row, i)) {
            None | Some("") => Some(entity.compliance_rating),
            Some(raw) => raw.parse::<f64>().ok(),
        };
        match (id.is_empty(), status, rating) {
            (false, Some(s), Some(r)) => {
                entity.status = s;
                entity.compliance_rating = r.clamp(0.0, 100.0);
                rows.push(entity);
            }
            _ => {
                warn!("{}: row {} ({}) could not be parsed; skipped", table.file, line + 2, id);
                skipped += 1;
            }
        }
    }
    Ok(Loaded { rows, skipped })
}

/// Columns: record_id, book_entry, source_filing, claim_filing. Blank
/// values mean the document does not exist.
pub fn load_documents(file: &str, csv_data: &str) -> Result<Loaded<ClaimDocuments>, ReconError> {
    let mut table = Table::open(file, csv_data)?;
    let record_id = table.idx("record_id")?;
    let book = table.idx("book_entry")?;
    let source = table.idx("source_filing")?;
    let claim = table.idx("claim_filing")?;

    let mut rows = Vec::new();
    let mut skipped = 0;
    for (line, row) in table.reader.records().enumerate() {
        let Some(row) = next_row(&table.file, line, row, &mut skipped) else {
            continue;
        };
        let id = field(&row, record_id).to_string();
        let parsed = (|| {
            Ok::<_, ()>(ClaimDocuments {
                record_id: id.clone(),
                book_entry: parse_optional_amount(field(&row, book))?,
                source_filing: parse_optional_amount(field(&row, source))?,
                claim_filing: parse_optional_amount(field(&row, claim))?,
            })
        })();
        match parsed {
            Ok(d) if !id.is_empty() => rows.push(d),
            _ => {
                warn!("{}: row {} ({}) could not be parsed; skipped", table.file, line + 2, id);
                skipped += 1;
            }
        }
    }
    Ok(Loaded { rows, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDS: &str = "\
record_id,invoice_number,issuer_id,receiver_id,date,taxable_amount,cgst,sgst,igst,declared_rate,source
a1,INV-001, s1 ,b1,2025-01-10,\"10,000\",900,900,0,18,seller_filed
b1,INV-001,S1,B1,10-01-2025,10000,900,900,,18,buyer_filed
bad,INV-002,S1,B1,not-a-date,1,0,0,0,18,seller_filed
";

    #[test]
    fn records_parse_and_skip() {
        let loaded = load_records("records.csv", RECORDS).unwrap();
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(loaded.skipped, 1);
        let a = &loaded.rows[0];
        assert_eq!(a.issuer_id, "S1");
        assert_eq!(a.taxable_amount, 10_000.0);
        assert_eq!(a.source, SourceTag::SellerFiled);
        assert_eq!(loaded.rows[1].date, a.date);
        assert_eq!(loaded.rows[1].tax.igst, 0.0);
    }

    #[test]
    fn missing_column_fails() {
        let err = load_records("r.csv", "record_id,invoice_number\nx,y\n").unwrap_err();
        assert!(err.to_string().contains("issuer_id"));
    }

    #[test]
    fn entities_with_defaults() {
        let csv = "entity_id,status,compliance_rating\nS1,active,80\nS2,cancelled,\nS3,weird,10\n";
        let loaded = load_entities("entities.csv", csv).unwrap();
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(loaded.skipped, 1);
        assert_eq!(loaded.rows[0].compliance_rating, 80.0);
        assert_eq!(loaded.rows[1].status, EntityStatus::Cancelled);
        assert_eq!(loaded.rows[1].compliance_rating, 50.0);
    }

    #[test]
    fn documents_blank_is_absent() {
        let csv = "record_id,book_entry,source_filing,claim_filing\nb1,1800,,1800\nb2,x,,\n";
        let loaded = load_documents("docs.csv", csv).unwrap();
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.skipped, 1);
        assert_eq!(loaded.rows[0].source_filing, None);
        assert_eq!(loaded.rows[0].claim_filing, Some(1800.0));
    }

    #[test]
    fn truncated_row_is_skipped_not_fatal() {
        let csv = "\
record_id,invoice_number,issuer_id,receiver_id,date,taxable_amount,cgst,sgst,igst,declared_rate,source
a2,INV-002,S1,B1,2025-01-11,1000
a1,INV-001,S1,B1,2025-01-10,1000,90,90,0,18,seller_filed
";
        let loaded = load_records("records.csv", csv).unwrap();
        assert_eq!(loaded.skipped, 1);
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.rows[0].record_id, "a1");

        let docs = "record_id,book_entry,source_filing,claim_filing\nb1,1800\n";
        let loaded = load_documents("docs.csv", docs).unwrap();
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.rows[0].source_filing, None);
    }

    #[test]
    fn blank_amount_or_rate_is_skipped() {
        let csv = "\
record_id,invoice_number,issuer_id,receiver_id,date,taxable_amount,cgst,sgst,igst,declared_rate,source
a1,INV-001,S1,B1,2025-01-10,,90,90,0,18,seller_filed
a2,INV-002,S1,B1,2025-01-10,1000,90,90,0,,seller_filed
a3,INV-003,S1,B1,2025-01-10,1000,,,180,18,seller_filed
";
        let loaded = load_records("records.csv", csv).unwrap();
        assert_eq!(loaded.skipped, 2);
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.rows[0].record_id, "a3");
        assert_eq!(loaded.rows[0].tax.cgst, 0.0);
        assert_eq!(loaded.rows[0].tax.igst, 180.0);
    }
}
