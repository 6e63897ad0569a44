pub mod balance;
pub mod error;
pub mod payment_methods;
pub mod pricing;
pub mod purchase;
pub mod webhook;

pub use balance::{BalanceResponse, LedgerEntryResponse, TopUpRequest, TopUpResponse};
pub use error::{ApiErrorBody, RetrySafety};
pub use payment_methods::{PaymentMethodResponse, PaymentMethodsResponse};
pub use pricing::{
    CityTier, JobSize, LeadPricingRequest, LeadPricingResponse, PriceBreakdownResponse, Urgency,
};
pub use purchase::{
    ConfirmPurchaseRequest, CreatePaymentIntentRequest, CreatePaymentIntentResponse,
    CustomerResponseAck, NEW_PAYMENT_METHOD, PurchaseResponse, PurchaseStatus,
    RefundTimerState, SelectPaymentMethodRequest,
};
pub use webhook::{
    GatewayIntentObject, GatewayWebhookData, GatewayWebhookEvent, LeadEventPayload, LeadEventType,
};
