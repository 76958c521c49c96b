use chrono::NaiveDateTime;
use serde::Serialize;

use crate::constants::{MerchantConfig, RTN_CODE_SUCCESS};
use crate::error::EcpayError;
use crate::mac;

/// A verified, normalized payment notification from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotification {
    /// Merchant order reference, echoed back for correlation.
    pub merchant_trade_no: String,
    /// Gateway-side trade number.
    pub trade_no: String,
    pub payment_date: Option<NaiveDateTime>,
    pub payment_type: String,
    /// Settled amount in minor currency units.
    pub trade_amount: i64,
    /// Set on sandbox simulated payments.
    pub simulate_paid: bool,
    pub rtn_code: String,
    pub rtn_msg: String,
    /// Audit copy of the integrity code the gateway supplied.
    pub check_mac_value: String,
}

impl PaymentNotification {
    /// Whether the notification reports a successful payment.
    ///
    /// A non-success return code is a business failure, not a verification
    /// failure — the notification itself is still valid and acknowledged.
    pub fn is_paid(&self) -> bool {
        self.rtn_code == RTN_CODE_SUCCESS || self.simulate_paid
    }
}

/// Verify and normalize a raw callback payload.
///
/// The MAC is recomputed over every supplied field except `CheckMacValue`
/// itself; no other field is trusted until that comparison passes. Performs
/// no I/O, so it can be exercised against literal payloads.
pub fn verify_notification(
    config: &MerchantConfig,
    fields: &[(String, String)],
) -> Result<PaymentNotification, EcpayError> {
    let supplied =
        get(fields, "CheckMacValue").ok_or(EcpayError::MissingField("CheckMacValue"))?;
    if !mac::verify_mac(fields, supplied, &config.hash_key, &config.hash_iv) {
        return Err(EcpayError::MacMismatch);
    }

    let merchant_trade_no = require(fields, "MerchantTradeNo")?;
    let trade_no = require(fields, "TradeNo")?;
    let rtn_code = require(fields, "RtnCode")?;
    let trade_amount = require(fields, "TradeAmt")?;
    let trade_amount = trade_amount
        .parse::<i64>()
        .map_err(|_| EcpayError::InvalidField {
            field: "TradeAmt",
            value: trade_amount.to_string(),
        })?;

    Ok(PaymentNotification {
        merchant_trade_no: merchant_trade_no.to_string(),
        trade_no: trade_no.to_string(),
        payment_date: get(fields, "PaymentDate").and_then(parse_payment_date),
        payment_type: get(fields, "PaymentType").unwrap_or_default().to_string(),
        trade_amount,
        simulate_paid: get(fields, "SimulatePaid").map(|v| v == "1").unwrap_or(false),
        rtn_code: rtn_code.to_string(),
        rtn_msg: get(fields, "RtnMsg").unwrap_or_default().to_string(),
        check_mac_value: supplied.to_string(),
    })
}

/// The gateway has sent both slash- and dash-separated date forms.
fn parse_payment_date(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y/%m/%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

fn get<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn require<'a>(fields: &'a [(String, String)], key: &'static str) -> Result<&'a str, EcpayError> {
    get(fields, key).ok_or(EcpayError::MissingField(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::check_mac_value;

    fn config() -> MerchantConfig {
        MerchantConfig::default()
    }

    fn signed_fields(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mac = check_mac_value(&fields, &config().hash_key, &config().hash_iv);
        fields.push(("CheckMacValue".to_string(), mac));
        fields
    }

    fn paid_fields() -> Vec<(String, String)> {
        signed_fields(&[
            ("MerchantTradeNo", "ORD20250301-42"),
            ("TradeNo", "2503011200000001"),
            ("PaymentDate", "2025/03/01 12:05:33"),
            ("PaymentType", "Credit_CreditCard"),
            ("TradeAmt", "9900"),
            ("SimulatePaid", "0"),
            ("RtnCode", "1"),
            ("RtnMsg", "Succeeded"),
        ])
    }

    #[test]
    fn test_verifies_and_normalizes() {
        let notification = verify_notification(&config(), &paid_fields()).unwrap();
        assert_eq!(notification.merchant_trade_no, "ORD20250301-42");
        assert_eq!(notification.trade_no, "2503011200000001");
        assert_eq!(notification.trade_amount, 9900);
        assert_eq!(notification.rtn_code, "1");
        assert!(!notification.simulate_paid);
        assert!(notification.is_paid());
        // Known vector for this exact field set.
        assert_eq!(
            notification.check_mac_value,
            "5C7C1C26339F455F0D8786627A330624"
        );
        let date = notification.payment_date.unwrap();
        assert_eq!(date.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-03-01 12:05:33");
    }

    #[test]
    fn test_tampered_field_is_mac_mismatch() {
        let mut fields = paid_fields();
        for (k, v) in fields.iter_mut() {
            if k.as_str() == "TradeAmt" {
                *v = "1".to_string();
            }
        }
        assert_eq!(
            verify_notification(&config(), &fields),
            Err(EcpayError::MacMismatch)
        );
    }

    #[test]
    fn test_mac_under_other_secret_is_rejected() {
        let mut fields: Vec<(String, String)> = vec![
            ("MerchantTradeNo".to_string(), "ORD-1".to_string()),
            ("TradeNo".to_string(), "T1".to_string()),
            ("TradeAmt".to_string(), "100".to_string()),
            ("RtnCode".to_string(), "1".to_string()),
        ];
        let forged = check_mac_value(&fields, "attacker-key", "attacker-iv");
        fields.push(("CheckMacValue".to_string(), forged));
        assert_eq!(
            verify_notification(&config(), &fields),
            Err(EcpayError::MacMismatch)
        );
    }

    #[test]
    fn test_missing_mac() {
        let fields = vec![("MerchantTradeNo".to_string(), "ORD-1".to_string())];
        assert_eq!(
            verify_notification(&config(), &fields),
            Err(EcpayError::MissingField("CheckMacValue"))
        );
    }

    #[test]
    fn test_missing_trade_no() {
        let fields = signed_fields(&[
            ("MerchantTradeNo", "ORD-1"),
            ("TradeAmt", "100"),
            ("RtnCode", "1"),
        ]);
        assert_eq!(
            verify_notification(&config(), &fields),
            Err(EcpayError::MissingField("TradeNo"))
        );
    }

    #[test]
    fn test_unparseable_amount() {
        let fields = signed_fields(&[
            ("MerchantTradeNo", "ORD-1"),
            ("TradeNo", "T1"),
            ("TradeAmt", "lots"),
            ("RtnCode", "1"),
        ]);
        assert!(matches!(
            verify_notification(&config(), &fields),
            Err(EcpayError::InvalidField { field: "TradeAmt", .. })
        ));
    }

    #[test]
    fn test_failed_payment_still_verifies() {
        let fields = signed_fields(&[
            ("MerchantTradeNo", "ORD-1"),
            ("TradeNo", "T1"),
            ("TradeAmt", "100"),
            ("RtnCode", "10200095"),
            ("RtnMsg", "card declined"),
        ]);
        let notification = verify_notification(&config(), &fields).unwrap();
        assert!(!notification.is_paid());
        assert_eq!(notification.rtn_msg, "card declined");
    }

    #[test]
    fn test_simulated_payment_counts_as_paid() {
        let fields = signed_fields(&[
            ("MerchantTradeNo", "ORD-1"),
            ("TradeNo", "T1"),
            ("TradeAmt", "100"),
            ("RtnCode", "0"),
            ("SimulatePaid", "1"),
        ]);
        let notification = verify_notification(&config(), &fields).unwrap();
        assert!(notification.simulate_paid);
        assert!(notification.is_paid());
    }

    #[test]
    fn test_garbled_date_becomes_none() {
        let fields = signed_fields(&[
            ("MerchantTradeNo", "ORD-1"),
            ("TradeNo", "T1"),
            ("TradeAmt", "100"),
            ("RtnCode", "1"),
            ("PaymentDate", "soon"),
        ]);
        let notification = verify_notification(&config(), &fields).unwrap();
        assert!(notification.payment_date.is_none());
    }
}
