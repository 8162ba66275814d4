use crate::domain::keyspace::Account;
use crate::domain::payment::Payment;

/// Events flowing through the payment event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    Confirmed(Payment),
}

impl PaymentEvent {
    pub fn account(&self) -> &Account {
        match self {
            Self::Confirmed(payment) => &payment.account,
        }
    }

    pub fn payment(&self) -> &Payment {
        match self {
            Self::Confirmed(payment) => payment,
        }
    }
}
