//! Loaders that turn the published CSV files into ordered `MarketTick`
//! series. Nothing here is used by the simulation arithmetic itself.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{MarketTick, PricePoint};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("No market data found")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShillerRow {
    pub date: NaiveDate,
    pub close: f64,
    pub dividend: Option<f64>,
    pub earnings: Option<f64>,
    pub cpi: Option<f64>,
    pub gs10: Option<f64>,
    pub real_price: Option<f64>,
    pub real_dividend: Option<f64>,
    pub real_earnings: Option<f64>,
}

/// Short-term rates keyed by (year, month), as annual fractions.
pub type RateTable = BTreeMap<(i32, u32), f64>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YahooQuote {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: f64,
}

impl PricePoint for YahooQuote {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn close(&self) -> f64 {
        self.close
    }
}

// FRED writes `.` for a month it has no observation for.
#[derive(Debug, Deserialize)]
struct TbillRow(
    NaiveDate,
    #[serde(deserialize_with = "csv::invalid_option")] Option<f64>,
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct YahooRow {
    date: NaiveDate,
    #[serde(deserialize_with = "csv::invalid_option")]
    open: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    high: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    low: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    close: Option<f64>,
    #[serde(rename = "Adj Close", deserialize_with = "csv::invalid_option")]
    adj_close: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    volume: Option<f64>,
}

impl YahooRow {
    fn quote(&self) -> Option<YahooQuote> {
        Some(YahooQuote {
            date: self.date,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close.filter(|close| *close > 0.0)?,
            adj_close: self.adj_close?,
            volume: self.volume?,
        })
    }
}

/// Reads the data rows of a Shiller export. Preamble lines are skipped and
/// the data ends at the first row that is not dated, or at the first row
/// with a field that is present but not numeric. A non-positive close is an
/// error rather than the end of the data.
pub fn parse_shiller<R: Read>(reader: R) -> Result<Vec<ShillerRow>, LoadError> {
    let mut csv = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();
    let mut started = false;

    for record in csv.records() {
        let record = record?;
        let dated = record
            .get(0)
            .is_some_and(|field| field.starts_with(|c: char| c.is_ascii_digit()));
        if !dated {
            if started {
                break;
            }
            continue;
        }
        started = true;

        match parse_shiller_row(&record)? {
            Some(row) => rows.push(row),
            None => {
                debug!(line = line_of(&record), "end of Shiller data");
                break;
            }
        }
    }

    if rows.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(rows)
}

fn parse_shiller_row(record: &StringRecord) -> Result<Option<ShillerRow>, LoadError> {
    let Some(date) = record.get(0).and_then(shiller_date) else {
        return Ok(None);
    };

    // Column 5 is the fractional date, which duplicates column 0.
    let mut values = [None; 10];
    for (i, value) in values.iter_mut().enumerate().skip(1) {
        if i == 5 {
            continue;
        }
        match record.get(i) {
            None | Some("") => {}
            Some(raw) => match number(raw) {
                Some(v) => *value = Some(v),
                None => return Ok(None),
            },
        }
    }

    let Some(close) = values[1] else {
        return Ok(None);
    };
    if !(close > 0.0) {
        return Err(LoadError::Parse {
            line: line_of(record),
            message: format!("close must be > 0 on {date}, found {close}"),
        });
    }

    Ok(Some(ShillerRow {
        date,
        close,
        dividend: values[2],
        earnings: values[3],
        cpi: values[4],
        gs10: values[6],
        real_price: values[7],
        real_dividend: values[8],
        real_earnings: values[9],
    }))
}

fn shiller_date(field: &str) -> Option<NaiveDate> {
    let (year, month) = field.split_once('.')?;
    // The spreadsheet stores dates as numbers, so October loses its zero.
    let month = if month == "1" { "10" } else { month };
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

// Spreadsheet exports quote large values with thousands separators.
fn number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map_or(0, |pos| pos.line())
}

/// Reads a FRED `TB3MS` export: a header, then `YYYY-MM-DD,percent` rows.
/// Missing observations are skipped.
pub fn parse_tbill<R: Read>(reader: R) -> Result<RateTable, LoadError> {
    let mut csv = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut rates = RateTable::new();
    for row in csv.deserialize::<TbillRow>() {
        let TbillRow(date, rate) = row?;
        match rate {
            Some(percent) => {
                rates.insert((date.year(), date.month()), percent / 100.0);
            }
            None => warn!(%date, "skipping missing T-bill rate"),
        }
    }
    Ok(rates)
}

/// Reads a Yahoo Finance daily history. Rows Yahoo fills with `null`, and
/// rows without a positive close, are skipped.
pub fn parse_yahoo<R: Read>(reader: R) -> Result<Vec<YahooQuote>, LoadError> {
    let mut csv = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut quotes = Vec::new();
    for row in csv.deserialize::<YahooRow>() {
        let row = row?;
        match row.quote() {
            Some(quote) => quotes.push(quote),
            None => debug!(date = %row.date, "skipping incomplete Yahoo row"),
        }
    }
    if quotes.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(quotes)
}

/// Joins Shiller rows with short-term rates by month. Months without a
/// published rate earn nothing.
pub fn to_market_ticks(rows: &[ShillerRow], rates: &RateTable) -> Vec<MarketTick> {
    rows.iter()
        .map(|row| MarketTick {
            date: row.date,
            price: row.close,
            dividend: row.dividend,
            cpi: row.cpi,
            risk_free_rate: rates
                .get(&(row.date.year(), row.date.month()))
                .copied()
                .unwrap_or(0.0),
        })
        .collect()
}

/// Drops trailing ticks whose dividend or CPI has not been published yet.
pub fn trim_incomplete(mut ticks: Vec<MarketTick>) -> Vec<MarketTick> {
    while ticks.last().is_some_and(|tick| !tick.is_complete()) {
        ticks.pop();
    }
    ticks
}

pub fn resample_annual(ticks: &[MarketTick], month: u32) -> Vec<MarketTick> {
    ticks
        .iter()
        .filter(|tick| tick.date.month() == month)
        .copied()
        .collect()
}

fn open(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads a complete monthly series: Shiller data, optionally joined with
/// T-bill rates, with unpublished trailing months removed.
pub fn load_market_series(
    shiller_path: &Path,
    tbill_path: Option<&Path>,
) -> Result<Vec<MarketTick>, LoadError> {
    let rows = parse_shiller(open(shiller_path)?)?;
    let rates = match tbill_path {
        Some(path) => parse_tbill(open(path)?)?,
        None => RateTable::new(),
    };
    let ticks = trim_incomplete(to_market_ticks(&rows, &rates));
    if ticks.is_empty() {
        return Err(LoadError::Empty);
    }
    debug!(
        ticks = ticks.len(),
        first = %ticks[0].date,
        last = %ticks[ticks.len() - 1].date,
        "loaded market series"
    );
    Ok(ticks)
}

pub fn load_yahoo(path: &Path) -> Result<Vec<YahooQuote>, LoadError> {
    parse_yahoo(open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHILLER: &str = "\
S&P Composite,,,,,
Date,P,D,E,CPI,Date Fraction,Rate GS10,Real Price,Real Dividend,Real Earnings,CAPE
1871.01,4.44,0.26,0.4,12.46,1871.04,5.32,89.0,5.21,8.02,NA
1871.09,4.64,0.26,0.4,12.6,1871.71,5.32,92.0,5.16,7.93,NA
1871.1,4.74,0.26,0.4,12.7,1871.79,5.32,93.3,5.12,7.87,NA
2023.01,3960.66,,,299.17,2023.04,3.53,4200.0,,,NA
2023.02,4079.68,,,,2023.13,3.75,4300.0,,,NA

Notes,,,
";

    #[test]
    fn shiller_rows_keep_missing_fields_as_none() {
        let rows = parse_shiller(SHILLER.as_bytes()).expect("parses");
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(1871, 1, 1).expect("date"));
        assert_eq!(rows[0].dividend, Some(0.26));
        assert_eq!(rows[0].gs10, Some(5.32));
        assert_eq!(rows[3].dividend, None);
        assert_eq!(rows[3].cpi, Some(299.17));
        assert_eq!(rows[4].cpi, None);
    }

    #[test]
    fn shiller_month_one_means_october() {
        let rows = parse_shiller(SHILLER.as_bytes()).expect("parses");
        assert_eq!(rows[2].date, NaiveDate::from_ymd_opt(1871, 10, 1).expect("date"));
    }

    #[test]
    fn shiller_data_ends_at_first_malformed_row() {
        let text = "1900.01,5.0,0.2,0.3,8.0,1900.04,3.0,1,1,1\n1900.02,n/a,0.2,0.3,8.0\n";
        let rows = parse_shiller(text.as_bytes()).expect("parses");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn shiller_without_rows_is_empty() {
        let err = parse_shiller("header only\n".as_bytes()).expect_err("no data");
        assert!(matches!(err, LoadError::Empty));
    }

    #[test]
    fn tbill_rates_become_fractions_and_skip_missing() {
        let text = "DATE,TB3MS\n1934-01-01,0.72\n1934-02-01,.\n1934-03-01,0.24\n";
        let rates = parse_tbill(text.as_bytes()).expect("parses");
        assert_eq!(rates.len(), 2);
        assert!((rates[&(1934, 1)] - 0.0072).abs() < 1e-12);
        assert!(!rates.contains_key(&(1934, 2)));
    }

    #[test]
    fn tbill_rejects_rows_without_a_rate_column() {
        let err = parse_tbill("DATE,TB3MS\n1934-01-01\n".as_bytes()).expect_err("bad row");
        assert!(matches!(err, LoadError::Csv(_)));
    }

    #[test]
    fn shiller_reads_quoted_thousands() {
        let text = "1990.01,\"1,248.77\",12.1,20.0,127.4,1990.04,8.2,1,1,1\n\
                    1990.02,\"1,250.10\",12.2,20.1,128.0,1990.13,8.5,1,1,1\n";
        let rows = parse_shiller(text.as_bytes()).expect("parses");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close, 1_248.77);
        assert_eq!(rows[1].close, 1_250.10);
        assert_eq!(rows[1].cpi, Some(128.0));
    }

    #[test]
    fn shiller_rejects_non_positive_close() {
        let text = "1900.01,5.0,0.2,0.3,8.0,1900.04,3.0,1,1,1\n1900.02,0,0.2,0.3,8.0,1900.13,3.0,1,1,1\n";
        let err = parse_shiller(text.as_bytes()).expect_err("zero close");
        assert!(matches!(err, LoadError::Parse { line: 2, .. }));
        assert!(err.to_string().contains("close must be > 0"));
    }

    #[test]
    fn ticks_join_rates_by_month_with_zero_default() {
        let rows = parse_shiller(SHILLER.as_bytes()).expect("parses");
        let mut rates = RateTable::new();
        rates.insert((1871, 9), 0.05);

        let ticks = to_market_ticks(&rows, &rates);
        assert_eq!(ticks[0].risk_free_rate, 0.0);
        assert_eq!(ticks[1].risk_free_rate, 0.05);
        assert_eq!(ticks[1].price, 4.64);
    }

    #[test]
    fn trailing_incomplete_ticks_are_trimmed() {
        let rows = parse_shiller(SHILLER.as_bytes()).expect("parses");
        let ticks = trim_incomplete(to_market_ticks(&rows, &RateTable::new()));
        assert_eq!(ticks.len(), 3);
        assert!(ticks.iter().all(MarketTick::is_complete));
    }

    #[test]
    fn annual_resampling_keeps_one_month() {
        let rows = parse_shiller(SHILLER.as_bytes()).expect("parses");
        let ticks = to_market_ticks(&rows, &RateTable::new());
        let octobers = resample_annual(&ticks, 10);
        assert_eq!(octobers.len(), 1);
        assert_eq!(octobers[0].price, 4.74);
    }

    #[test]
    fn yahoo_skips_null_rows() {
        let text = "Date,Open,High,Low,Close,Adj Close,Volume\n\
                    1950-01-03,16.66,16.66,16.66,16.66,16.66,1260000\n\
                    1950-01-04,null,null,null,null,null,null\n\
                    1950-01-05,16.93,16.93,16.93,16.93,16.93,2550000\n";
        let quotes = parse_yahoo(text.as_bytes()).expect("parses");
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[1].close, 16.93);
        assert_eq!(PricePoint::close(&quotes[0]), 16.66);
    }

    #[test]
    fn yahoo_skips_rows_without_a_positive_close() {
        let text = "Date,Open,High,Low,Close,Adj Close,Volume\n\
                    1950-01-03,16.66,16.66,16.66,16.66,16.66,1260000\n\
                    1950-01-04,0,0,0,0,0,0\n";
        let quotes = parse_yahoo(text.as_bytes()).expect("parses");
        assert_eq!(quotes.len(), 1);
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = load_market_series(Path::new("/nonexistent/ie_data.csv"), None)
            .expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/ie_data.csv"));
    }
}
