use chrono::NaiveDateTime;
use serde::Serialize;

use crate::constants::{MerchantConfig, CHOOSE_PAYMENT, ENCRYPT_TYPE, PAYMENT_TYPE};
use crate::mac;

/// Caller-supplied URLs for a checkout request.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Server-to-server notification URL; the gateway POSTs the payment
    /// result here.
    pub return_url: String,
    /// Where the buyer's browser returns to after checkout, if any.
    pub client_back_url: Option<String>,
    /// Browser-posted payment result URL, if any.
    pub order_result_url: Option<String>,
}

/// A submittable checkout request: the gateway endpoint plus the signed
/// parameter set in form-field order.
///
/// The parameters are signed last and never mutated after construction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub action: String,
    pub params: Vec<(String, String)>,
}

/// Build a signed checkout request for one order, stamped with the current
/// local time as the merchant trade date.
pub fn build_checkout(
    config: &MerchantConfig,
    order_number: &str,
    total_amount: i64,
    item_name: &str,
    trade_desc: &str,
    urls: &CheckoutUrls,
) -> CheckoutRequest {
    build_checkout_at(
        config,
        order_number,
        total_amount,
        item_name,
        trade_desc,
        urls,
        chrono::Local::now().naive_local(),
    )
}

/// Same as [`build_checkout`] with an explicit trade date, for deterministic
/// tests.
pub fn build_checkout_at(
    config: &MerchantConfig,
    order_number: &str,
    total_amount: i64,
    item_name: &str,
    trade_desc: &str,
    urls: &CheckoutUrls,
    trade_date: NaiveDateTime,
) -> CheckoutRequest {
    let mut params: Vec<(String, String)> = vec![
        ("MerchantID".into(), config.merchant_id.clone()),
        ("MerchantTradeNo".into(), order_number.to_string()),
        (
            "MerchantTradeDate".into(),
            trade_date.format("%Y-%m-%d %H:%M:%S").to_string(),
        ),
        ("PaymentType".into(), PAYMENT_TYPE.into()),
        ("TotalAmount".into(), total_amount.to_string()),
        ("TradeDesc".into(), trade_desc.to_string()),
        ("ItemName".into(), item_name.to_string()),
        ("ReturnURL".into(), urls.return_url.clone()),
        ("ChoosePayment".into(), CHOOSE_PAYMENT.into()),
        ("EncryptType".into(), ENCRYPT_TYPE.into()),
    ];

    if let Some(ref url) = urls.client_back_url {
        params.push(("ClientBackURL".into(), url.clone()));
    }
    if let Some(ref url) = urls.order_result_url {
        params.push(("OrderResultURL".into(), url.clone()));
    }

    let mac = mac::check_mac_value(&params, &config.hash_key, &config.hash_iv);
    params.push(("CheckMacValue".into(), mac));

    CheckoutRequest {
        action: config.checkout_url(),
        params,
    }
}

/// Render the browser auto-submit form for a checkout request.
///
/// The page submits itself after one second; a visible button covers
/// browsers with scripting disabled. All field values are HTML-escaped.
pub fn render_form_html(request: &CheckoutRequest) -> String {
    let fields = request
        .params
        .iter()
        .map(|(k, v)| {
            format!(
                r#"<input type="hidden" name="{}" value="{}">"#,
                escape_html(k),
                escape_html(v)
            )
        })
        .collect::<Vec<_>>()
        .join("\n      ");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Redirecting to payment…</title>
</head>
<body>
  <p>Redirecting to the payment page…</p>
  <form id="checkout" method="post" action="{action}">
      {fields}
      <button type="submit">Continue to payment</button>
  </form>
  <script>
    setTimeout(function () {{
      document.getElementById('checkout').submit();
    }}, 1000);
  </script>
</body>
</html>"#,
        action = escape_html(&request.action),
        fields = fields,
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::verify_mac;
    use chrono::NaiveDate;

    fn trade_date() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn urls() -> CheckoutUrls {
        CheckoutUrls {
            return_url: "https://api.example.com/api/orders/payment/callback".to_string(),
            client_back_url: None,
            order_result_url: None,
        }
    }

    fn get<'a>(request: &'a CheckoutRequest, key: &str) -> Option<&'a str> {
        request
            .params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_builds_known_vector() {
        let config = MerchantConfig::default();
        let request = build_checkout_at(
            &config,
            "c4ca4238a0b923820dcc509a6f75849b",
            9900,
            "Custom domain (30 days)",
            "Short URL service payment",
            &urls(),
            trade_date(),
        );

        assert_eq!(
            request.action,
            "https://payment-stage.ecpay.com.tw/Cashier/AioCheckOut/V5"
        );
        assert_eq!(get(&request, "MerchantID"), Some("2000132"));
        assert_eq!(get(&request, "MerchantTradeDate"), Some("2025-03-01 12:00:00"));
        assert_eq!(get(&request, "PaymentType"), Some("aio"));
        assert_eq!(get(&request, "TotalAmount"), Some("9900"));
        assert_eq!(get(&request, "ChoosePayment"), Some("Credit"));
        assert_eq!(get(&request, "EncryptType"), Some("1"));

        // The integrity code is the final field and matches the reference
        // algorithm for this exact parameter set.
        let (last_key, last_value) = request.params.last().unwrap();
        assert_eq!(last_key, "CheckMacValue");
        assert_eq!(last_value, "4F2B95363BF94D71E512B0EEF551C70B");
    }

    #[test]
    fn test_signed_set_verifies() {
        let config = MerchantConfig::default();
        let request = build_checkout_at(
            &config,
            "order-1",
            100,
            "Starter pack",
            "Short URL service payment",
            &urls(),
            trade_date(),
        );
        let mac = get(&request, "CheckMacValue").unwrap().to_string();
        assert!(verify_mac(
            &request.params,
            &mac,
            &config.hash_key,
            &config.hash_iv
        ));
    }

    #[test]
    fn test_optional_urls_are_signed_over() {
        let config = MerchantConfig::default();
        let mut with_urls = urls();
        with_urls.client_back_url = Some("https://app.example.com/orders/1".to_string());
        with_urls.order_result_url = Some("https://app.example.com/orders/1/result".to_string());

        let request = build_checkout_at(
            &config,
            "order-1",
            100,
            "Starter pack",
            "Short URL service payment",
            &with_urls,
            trade_date(),
        );
        assert_eq!(
            get(&request, "ClientBackURL"),
            Some("https://app.example.com/orders/1")
        );
        assert_eq!(
            get(&request, "OrderResultURL"),
            Some("https://app.example.com/orders/1/result")
        );

        let bare = build_checkout_at(
            &config,
            "order-1",
            100,
            "Starter pack",
            "Short URL service payment",
            &urls(),
            trade_date(),
        );
        // The optional URLs participate in the signature.
        assert_ne!(get(&request, "CheckMacValue"), get(&bare, "CheckMacValue"));
    }

    #[test]
    fn test_form_html_escapes_values() {
        let config = MerchantConfig::default();
        let request = build_checkout_at(
            &config,
            "order-1",
            100,
            r#"Pack <script>"x"</script>"#,
            "Short URL service payment",
            &urls(),
            trade_date(),
        );
        let html = render_form_html(&request);
        assert!(html.contains("Pack &lt;script&gt;&quot;x&quot;&lt;/script&gt;"));
        assert!(!html.contains("<script>\"x\""));
        assert!(html.contains(r#"method="post""#));
    }
}
