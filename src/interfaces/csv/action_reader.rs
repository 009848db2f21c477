use crate::error::{EscrowError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// `user` buys listing `target`; the order is remembered as `label`.
    Purchase,
    /// The gateway confirms payment for order `target`.
    Pay,
    /// The gateway declines payment for order `target`.
    Decline,
    /// `user` confirms receipt of order `target`.
    Complete,
    /// The external refund process refunds order `target`.
    Refund,
    RegisterScout,
    /// `user` withdraws `amount` paise of scout earnings.
    RequestPayout,
    /// Moves the clock forward by `amount` days.
    Advance,
    Settle,
    ProcessPending,
}

/// One row of a marketplace replay script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarketAction {
    #[serde(rename = "action")]
    pub r#type: ActionType,
    #[serde(default)]
    pub user: Option<u64>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Reads marketplace actions from a CSV source.
///
/// Whitespace is trimmed and trailing empty columns may be omitted.
pub struct ActionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ActionReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes actions, one `Result` per row.
    pub fn actions(self) -> impl Iterator<Item = Result<MarketAction>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EscrowError::from))
    }
}
