use std::fmt;
use std::iter::Fuse;

use chrono::NaiveDate;
use serde::Serialize;

use super::types::MarketTick;

pub trait PricePoint {
    fn date(&self) -> NaiveDate;
    fn close(&self) -> f64;
}

impl PricePoint for MarketTick {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn close(&self) -> f64 {
        self.price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decline<T> {
    pub peak: T,
    pub trough: T,
    pub recovery: T,
    pub percent: f64,
}

impl<T: PricePoint> fmt::Display for Decline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:7.2}  {}: {:7.2}  {}: {:7.2}  {:5.2}%",
            self.peak.date(),
            self.peak.close(),
            self.trough.date(),
            self.trough.close(),
            self.recovery.date(),
            self.recovery.close(),
            self.percent * 100.0
        )
    }
}

/// Peak → trough → recovery scanner. A decline still under water when the
/// data ends is never yielded.
pub struct Declines<I: Iterator> {
    inner: Fuse<I>,
    current: Option<I::Item>,
}

pub fn declines<I>(prices: I) -> Declines<I::IntoIter>
where
    I: IntoIterator,
    I::Item: PricePoint + Clone,
{
    Declines {
        inner: prices.into_iter().fuse(),
        current: None,
    }
}

impl<I> Iterator for Declines<I>
where
    I: Iterator,
    I::Item: PricePoint + Clone,
{
    type Item = Decline<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut peak = match self.current.take() {
            Some(tick) => tick,
            None => self.inner.next()?,
        };

        let mut tick = self.inner.next()?;
        while tick.close() > peak.close() {
            peak = tick;
            tick = self.inner.next()?;
        }

        let mut trough = tick.clone();
        while tick.close() < peak.close() {
            if tick.close() < trough.close() {
                trough = tick.clone();
            }
            tick = self.inner.next()?;
        }

        let percent = (peak.close() - trough.close()) / peak.close();
        self.current = Some(tick.clone());
        Some(Decline {
            peak,
            trough,
            recovery: tick,
            percent,
        })
    }
}
