/// Lifecycle of an invoice. Transitions only move forward:
/// Pending -> Partial -> Paid. The allocation engine is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(InvoiceStatus::Pending),
            "PARTIAL" => Some(InvoiceStatus::Partial),
            "PAID" => Some(InvoiceStatus::Paid),
            _ => None,
        }
    }
}

/// What the payment-recording path does with the part of a payment that
/// exceeds the student's total open balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverpaymentPolicy {
    /// Drop the excess. Matches the historical behavior.
    Ignore,
    /// Fail the whole mutation; the payment is not recorded.
    Reject,
    /// Record the excess on the payment row as an unallocated amount.
    Credit,
}

impl OverpaymentPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            OverpaymentPolicy::Ignore => "ignore",
            OverpaymentPolicy::Reject => "reject",
            OverpaymentPolicy::Credit => "credit",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ignore" => Some(OverpaymentPolicy::Ignore),
            "reject" => Some(OverpaymentPolicy::Reject),
            "credit" => Some(OverpaymentPolicy::Credit),
            _ => None,
        }
    }
}

impl Default for OverpaymentPolicy {
    fn default() -> Self {
        OverpaymentPolicy::Ignore
    }
}

/// An invoice with money still owed against it, as loaded for allocation.
/// `total_amount` is always derived from the invoice's line items;
/// `remaining_balance` is the stored cache and is present once any payment
/// has touched the invoice.
#[derive(Debug, Clone)]
pub struct OpenInvoice {
    pub id: String,
    pub due_date: String,
    pub total_amount: f64,
    pub remaining_balance: Option<f64>,
    pub status: InvoiceStatus,
}

impl OpenInvoice {
    /// Balance still owed. For PARTIAL invoices the stored remaining balance
    /// is authoritative; a PENDING invoice owes its full total.
    pub fn outstanding(&self) -> f64 {
        match self.status {
            InvoiceStatus::Partial => self.remaining_balance.unwrap_or(self.total_amount),
            _ => self.total_amount,
        }
    }
}

/// One invoice patch produced by an allocation run.
#[derive(Debug, Clone)]
pub struct InvoiceCredit {
    pub invoice_id: String,
    pub status: &'static str,
    pub remaining_balance: f64,
    pub credited: f64,
}

#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub credits: Vec<InvoiceCredit>,
    pub credited_total: f64,
    pub leftover: f64,
}

/// Apply one payment amount across a student's open invoices,
/// earliest due date first.
///
/// Walks the invoices with a running remainder: while the remainder covers an
/// invoice's outstanding balance the invoice is settled (PAID, remaining 0);
/// the first invoice it cannot cover becomes PARTIAL with the shortfall as its
/// new remaining balance, and the walk stops. Invoices past that point are not
/// touched. Zero open invoices yields an empty outcome with the full amount
/// left over; the caller decides what the leftover means (see
/// `OverpaymentPolicy`).
pub fn allocate(open_invoices: &[OpenInvoice], amount: f64) -> AllocationOutcome {
    let mut sorted: Vec<&OpenInvoice> = open_invoices.iter().collect();
    sorted.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut credits = Vec::new();
    let mut remaining_amount = amount;

    for invoice in sorted {
        if remaining_amount <= 0.0 {
            break;
        }
        let outstanding = invoice.outstanding();
        if remaining_amount >= outstanding {
            credits.push(InvoiceCredit {
                invoice_id: invoice.id.clone(),
                status: InvoiceStatus::Paid.as_str(),
                remaining_balance: 0.0,
                credited: outstanding,
            });
            remaining_amount -= outstanding;
        } else {
            credits.push(InvoiceCredit {
                invoice_id: invoice.id.clone(),
                status: InvoiceStatus::Partial.as_str(),
                remaining_balance: outstanding - remaining_amount,
                credited: remaining_amount,
            });
            remaining_amount = 0.0;
        }
    }

    AllocationOutcome {
        credited_total: amount - remaining_amount,
        leftover: remaining_amount,
        credits,
    }
}

/// One invoice as seen by the summary read path.
#[derive(Debug, Clone)]
pub struct InvoiceView {
    pub total_amount: f64,
    pub remaining_balance: Option<f64>,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinancialSummary {
    pub total_fees: f64,
    pub paid_amount: f64,
    pub pending_amount: f64,
    /// paid_amount - total_fees: non-positive under normal operation, the
    /// deficit still owed expressed as a negative number.
    pub balance: f64,
}

/// Classify every invoice into paid/pending buckets.
///
/// Maintains total_fees == paid_amount + pending_amount for any input set:
/// a PAID invoice contributes its whole total to paid, a PENDING invoice its
/// whole total to pending, and a PARTIAL invoice splits along its stored
/// remaining balance.
pub fn summarize<'a, I>(invoices: I) -> FinancialSummary
where
    I: IntoIterator<Item = &'a InvoiceView>,
{
    let mut total_fees = 0.0;
    let mut paid_amount = 0.0;
    let mut pending_amount = 0.0;

    for invoice in invoices {
        let total = invoice.total_amount;
        total_fees += total;
        match invoice.status {
            InvoiceStatus::Paid => paid_amount += total,
            InvoiceStatus::Partial => {
                let remaining = invoice.remaining_balance.unwrap_or(total);
                paid_amount += total - remaining;
                pending_amount += remaining;
            }
            InvoiceStatus::Pending => pending_amount += total,
        }
    }

    FinancialSummary {
        total_fees,
        paid_amount,
        pending_amount,
        balance: paid_amount - total_fees,
    }
}

/// Invariant check used by tests: stored remaining balance and status must
/// agree with the derived total.
pub fn consistent(total_amount: f64, remaining_balance: Option<f64>, status: InvoiceStatus) -> bool {
    match (status, remaining_balance) {
        (InvoiceStatus::Pending, None) => true,
        (InvoiceStatus::Pending, Some(_)) => false,
        (InvoiceStatus::Partial, Some(r)) => r > 0.0 && r < total_amount,
        (InvoiceStatus::Paid, Some(r)) => r == 0.0,
        // A paid invoice always carries its zeroed balance; a partial one
        // always carries the shortfall.
        (_, None) => false,
    }
}
