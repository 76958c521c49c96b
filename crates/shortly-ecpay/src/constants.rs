/// All-in-one checkout path on the gateway host.
pub const CHECKOUT_PATH: &str = "/Cashier/AioCheckOut/V5";

/// Stage (sandbox) gateway host.
pub const STAGE_HOST: &str = "https://payment-stage.ecpay.com.tw";

/// Sandbox merchant credentials published in the gateway's integration docs.
pub const STAGE_MERCHANT_ID: &str = "2000132";
pub const STAGE_HASH_KEY: &str = "5294y06JbISpM5x9";
pub const STAGE_HASH_IV: &str = "v77hoKGq4kWxNNIS";

/// Fixed `PaymentType` sent with every checkout request.
pub const PAYMENT_TYPE: &str = "aio";

/// Payment method offered at checkout.
pub const CHOOSE_PAYMENT: &str = "Credit";

/// `EncryptType` parameter sent with every checkout request.
pub const ENCRYPT_TYPE: &str = "1";

/// Return code the gateway sends for a successful payment.
pub const RTN_CODE_SUCCESS: &str = "1";

/// Acknowledgment body that stops gateway redelivery.
pub const ACK_OK: &str = "1|OK";

/// Build a failure acknowledgment body; the gateway will retry delivery.
pub fn ack_error(reason: &str) -> String {
    format!("0|{reason}")
}

/// Runtime merchant credentials and gateway host.
///
/// Built once at process start and passed into checkout building and
/// callback verification, rather than read from ambient environment state
/// at call time.
#[derive(Clone, PartialEq, Eq)]
pub struct MerchantConfig {
    pub merchant_id: String,
    /// Shared HashKey for the CheckMacValue.
    pub hash_key: String,
    /// Shared HashIV for the CheckMacValue.
    pub hash_iv: String,
    /// Gateway base URL (stage or production).
    pub host: String,
}

impl MerchantConfig {
    /// Full checkout endpoint URL on the configured host.
    pub fn checkout_url(&self) -> String {
        format!("{}{}", self.host, CHECKOUT_PATH)
    }
}

impl Default for MerchantConfig {
    /// Defaults to the gateway sandbox environment.
    fn default() -> Self {
        Self {
            merchant_id: STAGE_MERCHANT_ID.to_string(),
            hash_key: STAGE_HASH_KEY.to_string(),
            hash_iv: STAGE_HASH_IV.to_string(),
            host: STAGE_HOST.to_string(),
        }
    }
}

impl std::fmt::Debug for MerchantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantConfig")
            .field("merchant_id", &self.merchant_id)
            .field("hash_key", &"[REDACTED]")
            .field("hash_iv", &"[REDACTED]")
            .field("host", &self.host)
            .finish()
    }
}
