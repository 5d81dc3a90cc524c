//! HTTP header names exchanged between buyers and sellers.

/// Carries a base64-encoded payment payload from the buyer, and is echoed
/// back by the seller on success as proof of which payload was honored.
pub const X_PAYMENT: &str = "X-PAYMENT";

/// Carries the buyer's address on the first request, before the buyer
/// holds any voucher for this seller.
pub const X_BUYER: &str = "X-BUYER";

/// Carries a base64-encoded settlement response from the seller.
pub const X_PAYMENT_RESPONSE: &str = "X-PAYMENT-RESPONSE";
