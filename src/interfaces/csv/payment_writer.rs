use crate::domain::payment::Payment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Flat CSV projection of a payment record.
#[derive(Serialize)]
struct PaymentRow<'a> {
    index: u64,
    account: &'a str,
    status: String,
    amount: String,
    currency: &'a str,
    amount_in_currency: String,
    state: &'a str,
    created_at: String,
}

impl<'a> From<&'a Payment> for PaymentRow<'a> {
    fn from(p: &'a Payment) -> Self {
        Self {
            index: p.index,
            account: p.account.as_str(),
            status: p.status.to_string(),
            amount: p.amount.to_string(),
            currency: p.currency.as_str(),
            amount_in_currency: p.amount_in_currency.normalize().to_string(),
            state: &p.state,
            created_at: p.created_at.to_rfc3339(),
        }
    }
}

/// Writes payment records as CSV to any `Write` sink (e.g., Stdout, File).
///
/// The header row is always written, even for an empty listing.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        Self { writer }
    }

    /// Writes the header followed by one row per payment, ordered by index.
    pub fn write_payments(&mut self, mut payments: Vec<Payment>) -> Result<()> {
        payments.sort_by_key(|p| p.index);
        self.writer.write_record([
            "index",
            "account",
            "status",
            "amount",
            "currency",
            "amount_in_currency",
            "state",
            "created_at",
        ])?;
        for payment in &payments {
            self.writer.serialize(PaymentRow::from(payment))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
