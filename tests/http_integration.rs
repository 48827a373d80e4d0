//! End-to-end tests over the real hyper transport against a local mock server.
//!
//! These cover what the in-process fake cannot: pooled connections, real
//! redirects, `Set-Cookie` round trips, and name resolution failures.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use volley::{
    BatchItem, BatchRequests, BatchResponses, CookieParam, ErrorKind, Http, HyperTransport, Metric,
    Options, Params, Sample, SampleSink, VuContext,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn http_with(options: Options) -> (Http, UnboundedReceiver<Vec<Sample>>) {
    init_logging();
    let transport = HyperTransport::new(&options).expect("transport");
    let (sink, rx) = SampleSink::channel();
    let mut ctx = VuContext::new(options, Arc::new(transport), sink);
    ctx.begin_iteration(1, 0);
    (Http::new(ctx), rx)
}

fn http() -> (Http, UnboundedReceiver<Vec<Sample>>) {
    http_with(Options::default())
}

fn drain(rx: &mut UnboundedReceiver<Vec<Sample>>) -> Vec<Vec<Sample>> {
    let mut out = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        out.push(batch);
    }
    out
}

/// Responds with the request's `Cookie` header as the body.
fn echo_cookies(req: &Request) -> ResponseTemplate {
    let cookie = req
        .headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    ResponseTemplate::new(200).set_body_string(cookie)
}

#[tokio::test]
async fn get_returns_body_and_one_sample_per_metric() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "ada"})))
        .expect(1)
        .mount(&server)
        .await;

    let (http, mut rx) = http();
    let url = format!("{}/users/1", server.uri());
    let res = http.get(url.as_str(), Params::default()).await.unwrap();

    assert_eq!(res.status, 200);
    assert_eq!(res.error_code, 0);
    assert_eq!(res.url, url);
    assert_eq!(res.remote_ip, "127.0.0.1");
    assert_eq!(res.proto, "HTTP/1.1");
    assert_eq!(res.json_path("name").unwrap(), Some(&json!("ada")));

    let batches = drain(&mut rx);
    assert_eq!(batches.len(), 1);
    let samples = &batches[0];
    assert_eq!(samples.len(), Metric::ALL.len());
    for metric in Metric::ALL {
        assert!(samples.iter().any(|s| s.metric == metric), "missing {metric:?}");
    }
    let tags = &samples[0].tags;
    assert_eq!(tags.get("status"), Some("200"));
    assert_eq!(tags.get("method"), Some("GET"));
    assert_eq!(tags.get("url"), Some(url.as_str()));
    assert_eq!(tags.get("name"), Some(url.as_str()));
    assert_eq!(tags.get("vu"), Some("1"));
    assert_eq!(tags.get("iter"), Some("0"));
}

#[tokio::test]
async fn redirects_are_followed_with_a_sample_per_hop() {
    let server = MockServer::start().await;
    Mock::given(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/middle"))
        .mount(&server)
        .await;
    Mock::given(path("/middle"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/end"))
        .mount(&server)
        .await;
    Mock::given(path("/end"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .mount(&server)
        .await;

    let (http, mut rx) = http();
    let res = http
        .get(format!("{}/start", server.uri()), Params::default())
        .await
        .unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.text(), Some("done"));
    assert_eq!(res.url, format!("{}/end", server.uri()));

    let statuses: Vec<_> = drain(&mut rx)
        .iter()
        .map(|batch| batch[0].tags.get("status").unwrap_or_default().to_string())
        .collect();
    assert_eq!(statuses, ["302", "301", "200"]);
}

#[tokio::test]
async fn redirect_budget_of_zero_returns_the_redirect() {
    let server = MockServer::start().await;
    Mock::given(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/end"))
        .mount(&server)
        .await;

    let (http, _rx) = http();
    let res = http
        .get(format!("{}/start", server.uri()), Params::default().redirects(0))
        .await
        .unwrap();
    assert_eq!(res.status, 302);
    assert_eq!(res.error_code, 0);
}

#[tokio::test]
async fn set_cookie_lands_in_the_jar_and_is_sent_back() {
    let server = MockServer::start().await;
    Mock::given(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "session=abc; Path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(path("/whoami"))
        .respond_with(echo_cookies)
        .mount(&server)
        .await;

    let (http, _rx) = http();
    let login = http
        .get(format!("{}/login", server.uri()), Params::default())
        .await
        .unwrap();
    assert_eq!(login.cookies["session"][0].value, "abc");

    let whoami = format!("{}/whoami", server.uri());
    let plain = http.get(whoami.as_str(), Params::default()).await.unwrap();
    assert_eq!(plain.text(), Some("session=abc"));

    let appended = http
        .get(whoami.as_str(), Params::default().cookie("session", CookieParam::from("xyz")))
        .await
        .unwrap();
    assert_eq!(appended.text(), Some("session=abc; session=xyz"));

    let replaced = http
        .get(whoami.as_str(), Params::default().cookie("session", CookieParam::replace("xyz")))
        .await
        .unwrap();
    assert_eq!(replaced.text(), Some("session=xyz"));
}

#[tokio::test]
async fn batch_preserves_list_order_and_map_keys() {
    let server = MockServer::start().await;
    for name in ["a", "b", "c"] {
        Mock::given(path(format!("/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(name))
            .mount(&server)
            .await;
    }
    let (http, _rx) = http();
    let base = server.uri();

    let list = BatchRequests::List(
        ["c", "a", "b"]
            .iter()
            .map(|name| BatchItem::get(format!("{base}/{name}")))
            .collect(),
    );
    let bodies: Vec<_> = http
        .batch(list)
        .await
        .unwrap()
        .responses()
        .iter()
        .map(|r| r.text().unwrap_or_default().to_string())
        .collect();
    assert_eq!(bodies, ["c", "a", "b"]);

    let map = BatchRequests::Map(vec![
        ("first".to_string(), BatchItem::get(format!("{base}/a"))),
        ("second".to_string(), BatchItem::get(format!("{base}/b"))),
    ]);
    let responses = http.batch(map).await.unwrap();
    assert_eq!(responses.get("first").and_then(|r| r.text()), Some("a"));
    assert_eq!(responses.get("second").and_then(|r| r.text()), Some("b"));
}

#[tokio::test]
async fn keyed_batch_from_an_object_keeps_key_order() {
    let server = MockServer::start().await;
    for name in ["z", "a", "m"] {
        Mock::given(path(format!("/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(name))
            .mount(&server)
            .await;
    }
    let (http, _rx) = http();
    let base = server.uri();
    let requests = json!({
        "zeta": format!("{base}/z"),
        "alpha": ["GET", format!("{base}/a")],
        "mid": {"url": format!("{base}/m")},
    });

    let BatchResponses::Map(responses) = http.batch_value(Some(&requests)).await.unwrap() else {
        panic!("object in, map out");
    };
    let pairs: Vec<_> = responses
        .iter()
        .map(|(key, r)| (key.as_str(), r.text().unwrap_or_default()))
        .collect();
    assert_eq!(pairs, [("zeta", "z"), ("alpha", "a"), ("mid", "m")]);
}

#[tokio::test]
async fn malformed_batch_item_does_not_abort_its_siblings() {
    let server = MockServer::start().await;
    Mock::given(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let (http, _rx) = http();
    let ok = format!("{}/ok", server.uri());
    let requests = json!([ok, "http://[broken", ok]);
    let responses = http.batch_value(Some(&requests)).await.unwrap();
    let codes: Vec<_> = responses.responses().iter().map(|r| r.error_code).collect();
    assert_eq!(codes, [0, 1020, 0]);
}

#[tokio::test]
async fn templated_urls_share_one_name_tag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (http, mut rx) = http();
    let prefix = format!("{}/posts/", server.uri());
    for id in [1, 2] {
        let tag = http.url(&[prefix.as_str(), ""], &[id]);
        http.get(tag, Params::default()).await.unwrap();
    }
    let expected = format!("{prefix}${{}}");
    let names: Vec<_> = drain(&mut rx)
        .iter()
        .map(|batch| batch[0].tags.get("name").unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, [expected.clone(), expected]);
}

#[tokio::test]
async fn unresolvable_host_reports_a_dns_code() {
    let (http, mut rx) = http();
    let res = http
        .get("http://nonexistent.invalid/", Params::default())
        .await
        .unwrap();
    assert_eq!(res.status, 0);
    assert!(
        matches!(res.error_code, 1100 | 1101),
        "unexpected code {} ({})",
        res.error_code,
        res.error
    );
    let batches = drain(&mut rx);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].tags.get("status"), Some("0"));
}

#[tokio::test]
async fn throw_surfaces_failures_as_errors() {
    let options = Options {
        throw: true,
        ..Options::default()
    };
    let (http, _rx) = http_with(options);
    let err = http
        .get("http://nonexistent.invalid/", Params::default())
        .await
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Dns | ErrorKind::DnsNoSuchHost));
}

#[tokio::test]
async fn timeout_param_cuts_off_slow_responses() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let (http, mut rx) = http();
    let params = Params::from_value(&json!({"timeout": "100ms"})).unwrap();
    let res = http
        .get(format!("{}/slow", server.uri()), params)
        .await
        .unwrap();
    assert_eq!(res.status, 0);
    assert_eq!(res.error_code, 1050);
    let batches = drain(&mut rx);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].tags.get("error_code"), Some("1050"));
}

#[tokio::test]
async fn oversized_or_invalid_timeouts_never_abort_the_engine() {
    let server = MockServer::start().await;
    Mock::given(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    for bad in [json!(1e300), json!("1e300"), json!("soon"), json!(-5)] {
        let err = Params::from_value(&json!({"timeout": bad})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    let (http, _rx) = http();
    let huge = Params::from_value(&json!({"timeout": 1.5e22})).unwrap();
    let res = http
        .get(format!("{}/ok", server.uri()), huge)
        .await
        .unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.error_code, 0);
}
