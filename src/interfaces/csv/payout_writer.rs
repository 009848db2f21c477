use crate::domain::ids::UserId;
use crate::domain::payout::{Payout, PayoutStatus, PayoutType};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct PayoutRow {
    user: UserId,
    #[serde(rename = "type")]
    payout_type: PayoutType,
    status: PayoutStatus,
    amount: u64,
    display: String,
}

/// Writes payouts as `user,type,status,amount,display` CSV.
///
/// `amount` is the stored integer in paise; `display` is for humans only.
pub struct PayoutWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PayoutWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Rows are ordered by user, then creation time, so output is stable.
    pub fn write_payouts(&mut self, mut payouts: Vec<Payout>) -> Result<()> {
        payouts.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.payout_type.to_string().cmp(&b.payout_type.to_string()))
        });
        for payout in payouts {
            self.writer.serialize(PayoutRow {
                user: payout.user_id,
                payout_type: payout.payout_type,
                status: payout.status,
                amount: payout.amount.0,
                display: payout.amount.display(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
