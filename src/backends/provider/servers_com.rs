use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use super::{
    CertificateStore, CustomCertificateCreateInput, CustomCertificateUpdateInput, L7LoadBalancerCreateInput, L7LoadBalancerUpdateInput,
    LoadBalancer, LoadBalancerStore, ProviderError, SslCertificate,
};

const PER_PAGE: usize = 100;
const TARGET: &str = "backends::provider::servers_com";

/// REST client for the servers.com public API.
#[derive(Clone)]
pub struct ServersComClient {
    base_url: Url,
    http: HttpClient,
    access_token: String,
}

impl std::fmt::Debug for ServersComClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServersComClient").field("base_url", &self.base_url.as_str()).finish_non_exhaustive()
    }
}

impl ServersComClient {
    pub fn new(base_url: &str, access_token: &str, user_agent: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| ProviderError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ProviderError::InvalidUrl(format!("unsupported scheme {}", base_url.scheme())));
        }
        let http = HttpClient::builder().timeout(timeout).user_agent(user_agent).build()?;
        Ok(Self { base_url, http, access_token: access_token.to_owned() })
    }

    /// Every segment is percent-encoded on its own, an id can't climb out of its collection.
    fn url(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        if let Some(segment) = segments.iter().find(|segment| matches!(**segment, "" | "." | "..")) {
            return Err(ProviderError::InvalidUrl(format!("invalid path segment {segment:?}")));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut().map_err(|()| ProviderError::InvalidUrl(self.base_url.to_string()))?.pop_if_empty().extend(segments);
        Ok(url)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.access_token)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ProviderError> {
        let response = self.with_auth(self.http.get(self.url(segments)?)).send().await?;
        Self::handle_response(&segments.join("/"), response).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T, ProviderError> {
        let response = self.with_auth(self.http.post(self.url(segments)?)).json(body).send().await?;
        Self::handle_response(&segments.join("/"), response).await
    }

    async fn put<B: Serialize + Sync, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T, ProviderError> {
        let response = self.with_auth(self.http.put(self.url(segments)?)).json(body).send().await?;
        Self::handle_response(&segments.join("/"), response).await
    }

    async fn delete(&self, segments: &[&str]) -> Result<(), ProviderError> {
        let response = self.with_auth(self.http.delete(self.url(segments)?)).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::error_from(&segments.join("/"), status, response).await)
        }
    }

    async fn collect<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<T>, ProviderError> {
        let url = self.url(&[path])?;
        let mut items = vec![];
        let per_page = PER_PAGE.to_string();
        for page in 1.. {
            let page = page.to_string();
            let response = self
                .with_auth(self.http.get(url.clone()))
                .query(params)
                .query(&[("page", page.as_str()), ("per_page", per_page.as_str())])
                .send()
                .await?;
            let mut batch: Vec<T> = Self::handle_response(path, response).await?;
            let last_page = batch.len() < PER_PAGE;
            items.append(&mut batch);
            if last_page {
                break;
            }
        }
        debug!(target: TARGET, "collected {} items from {path}", items.len());
        Ok(items)
    }

    async fn handle_response<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ProviderError> {
        let status = response.status();
        if status.is_success() { Ok(response.json::<T>().await?) } else { Err(Self::error_from(path, status, response).await) }
    }

    async fn error_from(path: &str, status: StatusCode, response: Response) -> ProviderError {
        if status == StatusCode::NOT_FOUND {
            return ProviderError::NotFound(path.to_owned());
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|json| json["message"].as_str().map(ToOwned::to_owned))
            .unwrap_or(body);
        ProviderError::Api { status: status.as_u16(), message }
    }
}

#[async_trait]
impl CertificateStore for ServersComClient {
    async fn get_custom_certificate(&self, id: &str) -> Result<SslCertificate, ProviderError> {
        self.get(&["ssl_certificates", "custom", id]).await
    }

    async fn create_custom_certificate(&self, input: CustomCertificateCreateInput) -> Result<SslCertificate, ProviderError> {
        self.post(&["ssl_certificates", "custom"], &input).await
    }

    async fn update_custom_certificate(&self, id: &str, input: CustomCertificateUpdateInput) -> Result<SslCertificate, ProviderError> {
        self.put(&["ssl_certificates", "custom", id], &input).await
    }

    async fn list_custom_certificates(&self, label_selector: &str) -> Result<Vec<SslCertificate>, ProviderError> {
        self.collect("ssl_certificates", &[("type", "custom"), ("label_selector", label_selector)]).await
    }
}

#[async_trait]
impl LoadBalancerStore for ServersComClient {
    async fn list_l7_load_balancers(&self, label_selector: &str) -> Result<Vec<LoadBalancer>, ProviderError> {
        self.collect("load_balancers", &[("type", "l7"), ("label_selector", label_selector)]).await
    }

    async fn create_l7_load_balancer(&self, input: L7LoadBalancerCreateInput) -> Result<LoadBalancer, ProviderError> {
        self.post(&["load_balancers", "l7"], &input).await
    }

    async fn update_l7_load_balancer(&self, id: &str, input: L7LoadBalancerUpdateInput) -> Result<LoadBalancer, ProviderError> {
        self.put(&["load_balancers", "l7", id], &input).await
    }

    async fn delete_l7_load_balancer(&self, id: &str) -> Result<(), ProviderError> {
        self.delete(&["load_balancers", "l7", id]).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path, query_param},
    };

    use super::*;

    fn client(server: &MockServer) -> ServersComClient {
        ServersComClient::new(&server.uri(), "secret-token", "test-agent", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn rejects_invalid_urls() {
        let res = ServersComClient::new("ftp://api.example.com", "t", "a", Duration::from_secs(1));
        assert!(matches!(res, Err(ProviderError::InvalidUrl(_))));
        let res = ServersComClient::new("not a url", "t", "a", Duration::from_secs(1));
        assert!(matches!(res, Err(ProviderError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn lists_load_balancers_by_label_with_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/load_balancers"))
            .and(query_param("type", "l7"))
            .and(query_param("label_selector", "k8s.srvrscloud.com/api-gateway-id=uid-1"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "lb-1", "name": "gw-a", "status": "active", "external_addresses": ["192.0.2.10"], "type": "l7"}
            ])))
            .mount(&server)
            .await;

        let lbs = client(&server).list_l7_load_balancers("k8s.srvrscloud.com/api-gateway-id=uid-1").await.unwrap();
        assert_eq!(lbs.len(), 1);
        assert_eq!(lbs[0].id, "lb-1");
        assert_eq!(lbs[0].external_addresses, vec!["192.0.2.10".to_owned()]);
    }

    #[tokio::test]
    async fn collects_all_pages() {
        let server = MockServer::start().await;
        let first_page: Vec<_> = (0..PER_PAGE).map(|i| json!({"id": format!("cert-{i}")})).collect();
        Mock::given(method("GET"))
            .and(path("/ssl_certificates"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(first_page)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ssl_certificates"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "last", "sha1_fingerprint": "abc"}])))
            .mount(&server)
            .await;

        let certificates = client(&server).list_custom_certificates("k8s.srvrscloud.com/api-secret-id=s").await.unwrap();
        assert_eq!(certificates.len(), PER_PAGE + 1);
        assert_eq!(certificates[PER_PAGE].sha1_fingerprint, "abc");
    }

    #[tokio::test]
    async fn maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ssl_certificates/custom/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
            .mount(&server)
            .await;

        let err = client(&server).get_custom_certificate("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn certificate_id_stays_inside_its_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/load_balancers/l7/lb-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "lb-1"})))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.get_custom_certificate("../../load_balancers/l7/lb-1").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(client.get_custom_certificate("..").await, Err(ProviderError::InvalidUrl(_))));
        assert!(matches!(client.update_l7_load_balancer("", L7LoadBalancerUpdateInput::default()).await, Err(ProviderError::InvalidUrl(_))));
    }

    #[test]
    fn keeps_base_path_prefix() {
        let client = ServersComClient::new("https://api.example.com/v1/", "t", "a", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url(&["ssl_certificates", "custom", "a/b"]).unwrap().as_str(), "https://api.example.com/v1/ssl_certificates/custom/a%2Fb");
    }

    #[tokio::test]
    async fn maps_other_failures_to_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/load_balancers/l7/lb-1"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
            .mount(&server)
            .await;

        let err = client(&server).delete_l7_load_balancer("lb-1").await.unwrap_err();
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            },
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn creates_certificate_without_empty_chain() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ssl_certificates/custom"))
            .and(body_partial_json(json!({"name": "gw-secret-uid", "labels": {"k8s.srvrscloud.com/api-secret-id": "uid"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "cert-1", "sha1_fingerprint": "ff"})))
            .expect(1)
            .mount(&server)
            .await;

        let input = CustomCertificateCreateInput {
            name: "gw-secret-uid".to_owned(),
            public_key: "pub".to_owned(),
            private_key: "key".to_owned(),
            chain_key: None,
            labels: BTreeMap::from([("k8s.srvrscloud.com/api-secret-id".to_owned(), "uid".to_owned())]),
        };
        let certificate = client(&server).create_custom_certificate(input.clone()).await.unwrap();
        assert_eq!(certificate.id, "cert-1");
        assert!(!serde_json::to_value(&input).unwrap().as_object().unwrap().contains_key("chain_key"));
    }
}
