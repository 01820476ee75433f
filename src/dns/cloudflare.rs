use super::{
    ApiMessage,
    DnsError,
    DnsRecord,
    DnsZone,
    NewRecord,
    RecordType,
};
use reqwest::Method;
use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::{
    fmt,
    time::Duration,
};

pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

const PER_PAGE: usize = 100;

/// Wraps the cloudflare api response.
#[derive(Debug, Serialize, Deserialize)]
struct ApiResult<T> {
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    messages: Value,
    result: Option<T>,
    result_info: Option<ApiResultInfo>,
    success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiResultInfo {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    page: usize,
    #[serde(default)]
    per_page: usize,
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    total_pages: usize,
}

/// Client for the DNS records of one Cloudflare zone, authenticated with account email and API key.
///
/// Holds no mutable state; clones share the underlying connection pool.
#[derive(Clone)]
pub struct CloudflareApi {
    client: reqwest::Client,
    base_url: String,
    auth_email: String,
    auth_key: String,
    zone_id: String,
}

impl fmt::Debug for CloudflareApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareApi")
            .field("base_url", &self.base_url)
            .field("auth_email", &self.auth_email)
            .field("auth_key", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .finish()
    }
}

impl CloudflareApi {
    pub fn new(
        auth_email: impl Into<String>,
        auth_key: impl Into<String>,
        zone_id: impl Into<String>,
    ) -> Result<Self, DnsError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            auth_email: auth_email.into(),
            auth_key: auth_key.into(),
            zone_id: zone_id.into(),
        })
    }

    /// Talk to a different API endpoint, e.g. a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    fn records_url(&self, id: Option<&str>) -> String {
        let zone_id = &self.zone_id;
        match id {
            Some(id) => format!("{}/zones/{zone_id}/dns_records/{id}", self.base_url),
            None => format!("{}/zones/{zone_id}/dns_records", self.base_url),
        }
    }

    async fn request<R, B>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<ApiResult<R>, DnsError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        trace!(%method, %url, ?query, "cloudflare request");

        let req = self
            .client
            .request(method, url)
            .header("X-Auth-Email", &self.auth_email)
            .header("X-Auth-Key", &self.auth_key)
            .header("Content-Type", "application/json")
            .query(query);

        let req = if let Some(body) = body { req.json(body) } else { req };

        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;

        let body: ApiResult<R> = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(err) if status.is_success() => return Err(err.into()),
            Err(_) => {
                return Err(DnsError::Provider {
                    status: status.as_u16(),
                    errors: vec![ApiMessage {
                        code: 0,
                        message: text,
                    }],
                })
            }
        };

        if !status.is_success() || !body.success {
            return Err(DnsError::Provider {
                status: status.as_u16(),
                errors: body.errors,
            });
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl DnsZone for CloudflareApi {
    async fn list_records(&self, record_type: RecordType) -> Result<Vec<DnsRecord>, DnsError> {
        let url = self.records_url(None);
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("type", record_type.to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let body = self
                .request::<Vec<DnsRecord>, ()>(Method::GET, &url, &query, None)
                .await?;
            records.extend(body.result.unwrap_or_default());

            match body.result_info {
                Some(info) if info.total_pages > page => page += 1,
                _ => break,
            }
        }

        debug!(%record_type, count = records.len(), "listed dns records");

        if records.is_empty() {
            return Err(DnsError::NoRecords(record_type));
        }
        Ok(records)
    }

    async fn find_records(&self, record_type: RecordType, name: &str) -> Result<Vec<DnsRecord>, DnsError> {
        let url = self.records_url(None);
        let query = [
            ("type", record_type.to_string()),
            ("name", name.to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];
        let body = self
            .request::<Vec<DnsRecord>, ()>(Method::GET, &url, &query, None)
            .await?;
        Ok(body.result.unwrap_or_default())
    }

    async fn create_record(&self, record: NewRecord) -> Result<DnsRecord, DnsError> {
        info!(name = %record.name, r#type = %record.record_type, content = %record.content, proxied = record.proxied, "creating dns record");
        let url = self.records_url(None);
        self.request::<DnsRecord, _>(Method::POST, &url, &[], Some(&record))
            .await?
            .result
            .ok_or(DnsError::EmptyResponse)
    }

    async fn delete_record_by_id(&self, id: &str) -> Result<(), DnsError> {
        info!(?id, "deleting dns record");
        let url = self.records_url(Some(id));
        self.request::<Value, ()>(Method::DELETE, &url, &[], None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{
            body_json,
            header,
            method,
            path,
            query_param,
        },
        Mock,
        MockServer,
        ResponseTemplate,
    };

    fn record_json(id: &str, ty: &str, name: &str, content: &str) -> Value {
        json!({
            "id": id,
            "type": ty,
            "name": name,
            "content": content,
            "ttl": 1,
            "proxied": false,
            "zone_id": "zone",
            "zone_name": "example.com",
            "created_on": "2024-01-01T00:00:00Z",
            "modified_on": "2024-01-01T00:00:00Z"
        })
    }

    fn page(records: Vec<Value>, page: usize, total_pages: usize) -> Value {
        let count = records.len();
        json!({
            "success": true,
            "errors": [],
            "messages": [],
            "result": records,
            "result_info": {
                "page": page,
                "per_page": 100,
                "count": count,
                "total_count": count,
                "total_pages": total_pages
            }
        })
    }

    fn api(server: &MockServer) -> CloudflareApi {
        CloudflareApi::new("ops@example.com", "secret-key", "zone")
            .unwrap()
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn list_follows_pages_and_sends_auth_headers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/zones/zone/dns_records"))
            .and(query_param("type", "TXT"))
            .and(query_param("page", "1"))
            .and(header("X-Auth-Email", "ops@example.com"))
            .and(header("X-Auth-Key", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![record_json("1", "TXT", "a.example.com", "service/default/a")],
                1,
                2,
            )))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/zones/zone/dns_records"))
            .and(query_param("type", "TXT"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![record_json("2", "TXT", "b.example.com", "ingress/default/b")],
                2,
                2,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let records = api(&server).list_records(RecordType::TXT).await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn empty_list_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![], 1, 0)))
            .mount(&server)
            .await;

        let err = api(&server).list_records(RecordType::TXT).await.unwrap_err();
        assert!(matches!(err, DnsError::NoRecords(RecordType::TXT)));
    }

    #[tokio::test]
    async fn get_record_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone/dns_records"))
            .and(query_param("type", "A"))
            .and(query_param("name", "web.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![], 1, 0)))
            .mount(&server)
            .await;

        let err = api(&server)
            .get_record(RecordType::A, "web.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::NotFound { record_type: RecordType::A, .. }));
    }

    #[tokio::test]
    async fn create_posts_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/zones/zone/dns_records"))
            .and(body_json(json!({
                "type": "A",
                "name": "web.example.com",
                "content": "203.0.113.5",
                "ttl": 1,
                "proxied": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "messages": [],
                "result": record_json("abc", "A", "web.example.com", "203.0.113.5")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = api(&server)
            .create_record(NewRecord {
                record_type: RecordType::A,
                name: "web.example.com".to_string(),
                content: "203.0.113.5".to_string(),
                ttl: 1,
                proxied: true,
            })
            .await
            .unwrap();
        assert_eq!(record.id, "abc");
        assert_eq!(record.content, "203.0.113.5");
    }

    #[tokio::test]
    async fn rejected_create_carries_provider_codes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/zones/zone/dns_records"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "errors": [{ "code": 81057, "message": "Record already exists." }],
                "messages": [],
                "result": null
            })))
            .mount(&server)
            .await;

        let err = api(&server)
            .create_record(NewRecord {
                record_type: RecordType::TXT,
                name: "web.example.com".to_string(),
                content: "service/default/web".to_string(),
                ttl: 1,
                proxied: false,
            })
            .await
            .unwrap_err();

        match err {
            DnsError::Provider { status, errors } => {
                assert_eq!(status, 400);
                assert_eq!(errors[0].code, 81057);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_by_name_resolves_id_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone/dns_records"))
            .and(query_param("name", "web.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![record_json("rec-1", "A", "web.example.com", "203.0.113.5")],
                1,
                1,
            )))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/zones/zone/dns_records/rec-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "messages": [],
                "result": { "id": "rec-1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        api(&server).delete_record(RecordType::A, "web.example.com").await.unwrap();
    }

    #[tokio::test]
    async fn non_json_error_body_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = api(&server)
            .find_records(RecordType::A, "web.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::Provider { status: 502, .. }));
    }

    #[test]
    fn debug_hides_key() {
        let api = CloudflareApi::new("ops@example.com", "secret-key", "zone").unwrap();
        let debug = format!("{api:?}");
        assert!(!debug.contains("secret-key"));
    }
}
