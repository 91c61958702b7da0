//! AWS Signature Version 4 request signing for the Cost Explorer JSON API.

use crate::config::AwsCredentials;
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigV4Timestamp {
    pub amz_date: String,
    pub date: String,
}

impl SigV4Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            amz_date: at.format("%Y%m%dT%H%M%SZ").to_string(),
            date: at.format("%Y%m%d").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SigV4Signer {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
    pub security_token: Option<String>,
    pub canonical_request: String,
}

impl SignedHeaders {
    pub fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req
            .header("authorization", &self.authorization)
            .header("x-amz-date", &self.amz_date)
            .header("x-amz-content-sha256", &self.content_sha256);
        match &self.security_token {
            Some(token) => req.header("x-amz-security-token", token),
            None => req,
        }
    }
}

impl SigV4Signer {
    pub fn new(
        credentials: &AwsCredentials,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let region = region.into();
        let service = service.into();
        if credentials.access_key_id.trim().is_empty()
            || credentials.secret_access_key.trim().is_empty()
        {
            return Err(FetchError::Signing("access key and secret key are required".into()));
        }
        if region.trim().is_empty() || service.trim().is_empty() {
            return Err(FetchError::Signing("region and service are required".into()));
        }

        Ok(Self {
            access_key: credentials.access_key_id.clone(),
            secret_key: credentials.secret_access_key.clone(),
            session_token: credentials.session_token.clone(),
            region,
            service,
        })
    }

    pub fn sign(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        payload: &[u8],
        timestamp: &SigV4Timestamp,
    ) -> Result<SignedHeaders, FetchError> {
        let url = Url::parse(url)
            .map_err(|e| FetchError::Signing(format!("invalid url {url:?}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::Signing("url has no host".into()))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let payload_hash = sha256_hex(payload);
        let mut signed = BTreeMap::new();
        for (name, value) in headers {
            signed.insert(name.trim().to_ascii_lowercase(), collapse_spaces(value));
        }
        signed.entry("host".to_string()).or_insert(host);
        signed.insert("x-amz-date".to_string(), timestamp.amz_date.clone());
        signed
            .entry("x-amz-content-sha256".to_string())
            .or_insert_with(|| payload_hash.clone());
        if let Some(token) = &self.session_token {
            signed.insert("x-amz-security-token".to_string(), collapse_spaces(token));
        }

        let canonical_headers: String = signed
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_names = signed.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.trim(),
            canonical_uri(&url),
            canonical_query(&url),
            canonical_headers,
            signed_names,
            payload_hash
        );

        let scope = format!(
            "{}/{}/{}/aws4_request",
            timestamp.date, self.region, self.service
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            timestamp.amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = self.signature(&timestamp.date, &string_to_sign)?;

        Ok(SignedHeaders {
            authorization: format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.access_key, scope, signed_names, signature
            ),
            amz_date: timestamp.amz_date.clone(),
            content_sha256: payload_hash,
            security_token: self.session_token.clone(),
            canonical_request,
        })
    }

    fn signature(&self, date: &str, string_to_sign: &str) -> Result<String, FetchError> {
        let k_date = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), date)?;
        let k_region = hmac_sha256(&k_date, &self.region)?;
        let k_service = hmac_sha256(&k_region, &self.service)?;
        let k_signing = hmac_sha256(&k_service, "aws4_request")?;
        Ok(hex_encode(&hmac_sha256(&k_signing, string_to_sign)?))
    }
}

fn canonical_uri(url: &Url) -> String {
    match url.path() {
        "" => "/".to_string(),
        path => percent_encode(path, false),
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (percent_encode(&k, true), percent_encode(&v, true)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(value: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for &byte in value.as_bytes() {
        let unreserved =
            matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~');
        if unreserved || (!encode_slash && byte == b'/') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn collapse_spaces(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, FetchError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| FetchError::Signing(format!("invalid hmac key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference_credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        }
    }

    #[test]
    fn timestamp_formats_amz_date() {
        let at = Utc
            .with_ymd_and_hms(2015, 8, 30, 12, 36, 0)
            .single()
            .expect("valid timestamp");
        let ts = SigV4Timestamp::from_datetime(at);
        assert_eq!(ts.amz_date, "20150830T123600Z");
        assert_eq!(ts.date, "20150830");
    }

    #[test]
    fn signs_reference_request() {
        let signer = SigV4Signer::new(&reference_credentials(), "us-east-1", "iam")
            .expect("signer");
        let mut headers = BTreeMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        );
        let ts = SigV4Timestamp {
            amz_date: "20150830T123600Z".into(),
            date: "20150830".into(),
        };

        let signed = signer
            .sign(
                "GET",
                "https://iam.amazonaws.com/?Action=ListUsers&Version=2010-05-08",
                &headers,
                b"",
                &ts,
            )
            .expect("sign");

        let expected_canonical = [
            "GET",
            "/",
            "Action=ListUsers&Version=2010-05-08",
            "content-type:application/x-www-form-urlencoded; charset=utf-8",
            "host:iam.amazonaws.com",
            "x-amz-content-sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            "x-amz-date:20150830T123600Z",
            "",
            "content-type;host;x-amz-content-sha256;x-amz-date",
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        ]
        .join("\n");
        assert_eq!(signed.canonical_request, expected_canonical);
        assert_eq!(
            signed.authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date, Signature=dd479fa8a80364edf2119ec24bebde66712ee9c9cb2b0d92eb3ab9ccdc0c3947"
        );
    }

    #[test]
    fn session_token_is_signed_and_applied() {
        let mut creds = reference_credentials();
        creds.session_token = Some("token-123".into());
        let signer = SigV4Signer::new(&creds, "us-east-1", "ce").expect("signer");
        let ts = SigV4Timestamp {
            amz_date: "20240101T000000Z".into(),
            date: "20240101".into(),
        };

        let signed = signer
            .sign("POST", "https://ce.us-east-1.amazonaws.com/", &BTreeMap::new(), b"{}", &ts)
            .expect("sign");
        assert!(signed
            .authorization
            .contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token"));
        assert_eq!(signed.security_token.as_deref(), Some("token-123"));
    }

    #[test]
    fn rejects_blank_credentials() {
        let creds = AwsCredentials {
            access_key_id: " ".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        };
        assert!(SigV4Signer::new(&creds, "us-east-1", "ce").is_err());
    }

    #[test]
    fn percent_encoding_follows_aws_rules() {
        assert_eq!(percent_encode("a b/c", true), "a%20b%2Fc");
        assert_eq!(percent_encode("a b/c", false), "a%20b/c");
        assert_eq!(percent_encode("~-_.", true), "~-_.");
    }
}
