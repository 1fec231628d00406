use std::io::Read;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Reads all records of a headered CSV stream, mapping decode failures to
/// parse errors carrying the 1-based line and the offending column.
pub(crate) fn read_records<T: DeserializeOwned>(reader: impl Read) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new().from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| parse_error(&csv::StringRecord::new(), e))?
        .clone();

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result.map_err(|e| parse_error(&headers, e))?);
    }
    Ok(records)
}

fn parse_error(headers: &csv::StringRecord, err: csv::Error) -> Error {
    let line = err.position().map_or(0, csv::Position::line);
    let column = match err.kind() {
        csv::ErrorKind::Deserialize { err: de, .. } => de
            .field()
            .and_then(|index| headers.get(index as usize))
            .unwrap_or("?")
            .to_owned(),
        _ => "?".to_owned(),
    };
    Error::Parse {
        line,
        column,
        message: err.to_string(),
    }
}

// deserialize function for decimal columns; tolerates thousands separators
// and treats an empty field as zero
pub(crate) fn deserialize_decimal<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Decimal, D::Error> {
    let raw: String = Deserialize::deserialize(d)?;
    let cleaned = raw.replace(',', "");
    if cleaned.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(&cleaned).map_err(serde::de::Error::custom)
}

// deserialize function for nullable decimal columns; an empty field is None,
// which is distinct from zero
pub(crate) fn deserialize_opt_decimal<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Decimal>, D::Error> {
    let raw: String = Deserialize::deserialize(d)?;
    let cleaned = raw.replace(',', "");
    if cleaned.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&cleaned)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[derive(Debug, serde::Deserialize)]
    struct Row {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Amount", deserialize_with = "deserialize_decimal")]
        amount: Decimal,
        #[serde(rename = "Fee", deserialize_with = "deserialize_opt_decimal")]
        fee: Option<Decimal>,
    }

    #[test]
    fn test_read_records() {
        let csv = "Name,Amount,Fee\nBTC,\"454,359\",0.01\nJPY,0,\n";
        let rows: Vec<Row> = read_records(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "BTC");
        assert_eq!(rows[0].amount, dec!(454359));
        assert_eq!(rows[0].fee, Some(dec!(0.01)));
        assert_eq!(rows[1].amount, Decimal::ZERO);
        assert_eq!(rows[1].fee, None);
    }

    #[test]
    fn test_parse_error_carries_line_and_column() {
        let csv = "Name,Amount,Fee\nBTC,not-a-number,\n";
        let err = read_records::<Row>(csv.as_bytes()).unwrap_err();
        match err {
            Error::Parse { line, column, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, "Amount");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
