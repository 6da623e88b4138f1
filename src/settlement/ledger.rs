//! General ledger journal payloads.
//!
//! The engine only builds balanced entries; posting them is the accounting
//! system's job.

use crate::claims::claim::Claim;
use crate::core::config::GlAccounts;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl JournalLine {
    pub fn debit(account: &str, amount: Decimal) -> Self {
        Self {
            account: account.to_string(),
            debit: amount,
            credit: Decimal::ZERO,
        }
    }

    pub fn credit(account: &str, amount: Decimal) -> Self {
        Self {
            account: account.to_string(),
            debit: Decimal::ZERO,
            credit: amount,
        }
    }
}

/// A journal entry tagged with the reference it was raised for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub reference: String,
    pub description: String,
    pub lines: Vec<JournalLine>,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn total_debits(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credits(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }

    /// Debits equal credits.
    pub fn is_balanced(&self) -> bool {
        self.total_debits() == self.total_credits()
    }
}

/// Receivable raised when a claim goes to the regulator.
pub fn claim_accrual(claim: &Claim, gl: &GlAccounts, at: DateTime<Utc>) -> JournalEntry {
    JournalEntry {
        reference: claim.claim_number().to_string(),
        description: format!("UPPF claim accrual for {}", claim.consignment_id()),
        lines: vec![
            JournalLine::debit(&gl.receivable, claim.total_amount()),
            JournalLine::credit(&gl.uppf_income, claim.total_amount()),
        ],
        created_at: at,
    }
}

/// Cash received against one claim.
///
/// Short payment is written back against UPPF income; over payment is
/// recognised as extra UPPF income. The claim's receivable is always cleared
/// in full.
pub fn claim_settlement(claim: &Claim, approved: Decimal, gl: &GlAccounts, at: DateTime<Utc>) -> JournalEntry {
    let claimed = claim.total_amount();
    let mut lines = vec![JournalLine::debit(&gl.cash, approved)];
    let variance = approved - claimed;
    if variance < Decimal::ZERO {
        lines.push(JournalLine::debit(&gl.uppf_income, -variance));
    }
    lines.push(JournalLine::credit(&gl.receivable, claimed));
    if variance > Decimal::ZERO {
        lines.push(JournalLine::credit(&gl.uppf_income, variance));
    }
    JournalEntry {
        reference: claim.claim_number().to_string(),
        description: format!("UPPF settlement for {}", claim.claim_number()),
        lines,
        created_at: at,
    }
}

/// Reverses the accrual of a claim the regulator turned down.
pub fn claim_rejection(claim: &Claim, gl: &GlAccounts, at: DateTime<Utc>) -> JournalEntry {
    JournalEntry {
        reference: claim.claim_number().to_string(),
        description: format!("UPPF claim {} rejected by regulator", claim.claim_number()),
        lines: vec![
            JournalLine::debit(&gl.uppf_income, claim.total_amount()),
            JournalLine::credit(&gl.receivable, claim.total_amount()),
        ],
        created_at: at,
    }
}

/// Difference between the bank receipt and the settlement it pays.
///
/// Settlement entries book the expected net amount as cash; this moves the
/// shortfall (or excess) into the payment variance account. `None` when the
/// amounts agree.
pub fn payment_variance(
    reference: &str,
    expected: Decimal,
    received: Decimal,
    gl: &GlAccounts,
    at: DateTime<Utc>,
) -> Option<JournalEntry> {
    let variance = received - expected;
    let lines = if variance < Decimal::ZERO {
        vec![
            JournalLine::debit(&gl.payment_variance, -variance),
            JournalLine::credit(&gl.cash, -variance),
        ]
    } else if variance > Decimal::ZERO {
        vec![
            JournalLine::debit(&gl.cash, variance),
            JournalLine::credit(&gl.payment_variance, variance),
        ]
    } else {
        return None;
    };
    Some(JournalEntry {
        reference: reference.to_string(),
        description: format!("bank receipt variance against {}", reference),
        lines,
        created_at: at,
    })
}

/// Penalties withheld and bonuses paid on top of a settled batch. `None`
/// when the batch carried neither.
pub fn settlement_adjustments(
    reference: &str,
    penalties: Decimal,
    bonuses: Decimal,
    gl: &GlAccounts,
    at: DateTime<Utc>,
) -> Option<JournalEntry> {
    let mut lines = Vec::new();
    if penalties > Decimal::ZERO {
        lines.push(JournalLine::debit(&gl.penalties, penalties));
        lines.push(JournalLine::credit(&gl.cash, penalties));
    }
    if bonuses > Decimal::ZERO {
        lines.push(JournalLine::debit(&gl.cash, bonuses));
        lines.push(JournalLine::credit(&gl.other_income, bonuses));
    }
    if lines.is_empty() {
        return None;
    }
    Some(JournalEntry {
        reference: reference.to_string(),
        description: "UPPF settlement penalties and performance bonuses".to_string(),
        lines,
        created_at: at,
    })
}

/// Running balance per account over a set of journal entries.
///
/// Positive balances are net debits, negative balances net credits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialBalance {
    balances: BTreeMap<String, Decimal>,
}

impl TrialBalance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, entry: &JournalEntry) {
        for line in &entry.lines {
            *self
                .balances
                .entry(line.account.clone())
                .or_insert(Decimal::ZERO) += line.debit - line.credit;
        }
    }

    pub fn balance(&self, account: &str) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn balances(&self) -> &BTreeMap<String, Decimal> {
        &self.balances
    }

    /// Sum of all account balances is zero.
    pub fn is_balanced(&self) -> bool {
        self.balances.values().sum::<Decimal>() == Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_accrual_then_short_settlement_clears_receivable() {
        let gl = GlAccounts::default();
        let claim = Claim::draft_for_test("UPPF-1", dec!(1080.00));
        let now = Utc::now();

        let accrual = claim_accrual(&claim, &gl, now);
        let settled = claim_settlement(&claim, dec!(1000.00), &gl, now);
        assert!(accrual.is_balanced());
        assert!(settled.is_balanced());

        let mut tb = TrialBalance::new();
        tb.apply(&accrual);
        tb.apply(&settled);
        assert!(tb.is_balanced());
        assert_eq!(tb.balance(&gl.receivable), Decimal::ZERO);
        assert_eq!(tb.balance(&gl.cash), dec!(1000.00));
        assert_eq!(tb.balance(&gl.uppf_income), dec!(-1000.00));
    }

    #[test]
    fn test_over_payment_is_income() {
        let gl = GlAccounts::default();
        let claim = Claim::draft_for_test("UPPF-2", dec!(500.00));
        let entry = claim_settlement(&claim, dec!(520.00), &gl, Utc::now());
        assert!(entry.is_balanced());
        assert_eq!(entry.total_debits(), dec!(520.00));
    }

    #[test]
    fn test_rejection_reverses_accrual() {
        let gl = GlAccounts::default();
        let claim = Claim::draft_for_test("UPPF-3", dec!(1219.54));
        let now = Utc::now();

        let mut tb = TrialBalance::new();
        tb.apply(&claim_accrual(&claim, &gl, now));
        let reversal = claim_rejection(&claim, &gl, now);
        assert!(reversal.is_balanced());
        tb.apply(&reversal);

        assert_eq!(tb.balance(&gl.receivable), Decimal::ZERO);
        assert_eq!(tb.balance(&gl.uppf_income), Decimal::ZERO);
    }

    #[test]
    fn test_payment_variance_entry() {
        let gl = GlAccounts::default();
        let short = payment_variance("SETTL-1", dec!(1000.00), dec!(990.00), &gl, Utc::now()).unwrap();
        assert!(short.is_balanced());
        assert_eq!(short.lines[0], JournalLine::debit(&gl.payment_variance, dec!(10.00)));
        assert_eq!(short.lines[1], JournalLine::credit(&gl.cash, dec!(10.00)));

        let over = payment_variance("SETTL-1", dec!(1000.00), dec!(1000.50), &gl, Utc::now()).unwrap();
        assert_eq!(over.lines[0], JournalLine::debit(&gl.cash, dec!(0.50)));

        assert!(payment_variance("SETTL-1", dec!(1000.00), dec!(1000.00), &gl, Utc::now()).is_none());
    }

    #[test]
    fn test_adjustments_entry() {
        let gl = GlAccounts::default();
        let entry = settlement_adjustments("SETTL-1", dec!(12.50), dec!(3.00), &gl, Utc::now()).unwrap();
        assert!(entry.is_balanced());
        assert_eq!(entry.lines.len(), 4);
        assert!(settlement_adjustments("SETTL-2", Decimal::ZERO, Decimal::ZERO, &gl, Utc::now()).is_none());
    }
}
