//! Business logic of the reconciliation core

pub mod notification;
pub mod payment_initiation;
pub mod status_adapter;
pub mod status_merge;
pub mod voucher_assignment;

pub use notification::{NotificationService, OperationalAlert, SmsSender};
pub use payment_initiation::{InitiatedPayment, PaymentInitiationService};
pub use status_adapter::{map_provider_status, InternalStatus, ProviderStatusAdapter, StatusCheck};
pub use status_merge::{PaymentStatusService, ResendReceipt, StatusView};
pub use voucher_assignment::{
    Assignment, AssignmentError, FulfillmentOutcome, VoucherAssignmentService,
};
