//! End-to-end pipeline tests.
//!
//! Each test drives a request through the standard five stages:
//!
//! 1. Error Normalization
//! 2. Request ID
//! 3. Parameters
//! 4. Crypto
//! 5. Signature

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use portcullis_cache::MemoryStore;
use portcullis_core::ApiResponse;
use portcullis_crypto::{
    AesCbcCipher, CanonicalBuilder, CanonicalSuffix, Cipher, CipherAlgorithm, DigestAlgorithm,
    KeyOrder, RsaMaterial, RsaPadding, SecretConfig, SecretMaterial, SecretResolver,
    SignatureAlgorithm, SignatureProvider, StaticSecretSource, Strictness, SuffixContext,
};
use portcullis_middleware::{
    BoxFuture, CanonicalOptions, MiddlewareContext, Pipeline, PipelineConfig, Request, Response,
    ResponseExt, SigningRule, SigningRules, Stage,
};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use std::sync::Arc;

const AES_KEY: &str = "0123456789abcdef";
const AES_IV: &str = "fedcba9876543210";
/// base64("X1")
const APP_ID_HEADER: &str = "WDE=";

fn no_fields() -> std::iter::Empty<&'static str> {
    std::iter::empty()
}

fn rules() -> SigningRules {
    SigningRules::new()
        .with_rule("user.profile", SigningRule::new(no_fields(), ["name"]))
        .with_rule(
            "user.login",
            SigningRule::new(["name", "password", "secureCode"], no_fields()),
        )
        .with_rule("user.register", SigningRule::new(no_fields(), no_fields()))
}

fn pipeline(material: SecretMaterial) -> Pipeline {
    pipeline_with(material, PipelineConfig::default())
}

fn pipeline_with(material: SecretMaterial, config: PipelineConfig) -> Pipeline {
    let resolver = SecretResolver::new(
        Arc::new(MemoryStore::new()),
        Arc::new(StaticSecretSource::new().with_material(material)),
        SecretConfig::default(),
    );
    let config = PipelineConfig {
        rules: rules(),
        ..config
    };
    Pipeline::standard(&config, Arc::new(resolver))
}

fn aes_material() -> SecretMaterial {
    SecretMaterial::new("X1").with_aes(AES_KEY, AES_IV)
}

fn client_aes() -> Cipher {
    Cipher::from(AesCbcCipher::new(AES_KEY.as_bytes(), AES_IV.as_bytes()).unwrap())
}

/// A handler that echoes selected parameters back as `data`.
fn echo_handler(
    fields: &'static [&'static str],
) -> impl FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static
{
    move |ctx, _request| {
        let mut data = serde_json::Map::new();
        for field in fields {
            if let Some(value) = ctx.params().get(*field) {
                data.insert((*field).to_string(), value.clone());
            }
        }
        Box::pin(async move { Response::ok(Value::Object(data)) })
    }
}

async fn envelope(response: Response) -> ApiResponse {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    ApiResponse::from_slice(&body).unwrap()
}

fn md5_over(data: &Value, fields: &[&str]) -> String {
    let fields: Vec<String> = fields.iter().map(ToString::to_string).collect();
    let canonical = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict)
        .build(data.as_object().unwrap(), &fields, &SuffixContext::default())
        .unwrap();
    SignatureProvider::digest(DigestAlgorithm::Md5)
        .sign(canonical.as_bytes())
        .unwrap()
}

#[tokio::test]
async fn combined_aes_round_trip_with_signed_response() {
    let client = client_aes();
    let ciphertext = client.encrypt(br#"{"name":"bob"}"#).unwrap();
    let body = serde_urlencoded::to_string([("ciphertext", ciphertext.as_str())]).unwrap();

    let request = http::Request::builder()
        .method("POST")
        .uri("/user/profile")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-app-id", APP_ID_HEADER)
        .header("x-cipher", "cipher")
        .header("x-request-id", "req-1")
        .body(Full::new(Bytes::from(body)))
        .unwrap();

    let response = pipeline(aes_material())
        .process(
            MiddlewareContext::for_operation("user.profile"),
            request,
            echo_handler(&["name", "ciphertext"]),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-1");
    assert_eq!(response.headers()["x-crypto-type"], "aes");
    assert_eq!(response.headers()["x-sign-type"], "md5");

    let envelope = envelope(response).await;
    let data = envelope.data_object().unwrap();
    assert_eq!(data.len(), 1);
    let sealed = data["ciphertext"].as_str().unwrap();
    let opened: Value = serde_json::from_slice(&client.decrypt(sealed).unwrap()).unwrap();

    // The handler saw the decrypted name and no leftover ciphertext; the
    // response was signed before it was encrypted.
    assert_eq!(opened["name"], json!("bob"));
    assert!(opened.get("ciphertext").is_none());
    assert_eq!(opened["sign"], json!(md5_over(&json!({"name": "bob"}), &["name"])));
}

#[tokio::test]
async fn login_signature_accepts_valid_and_rejects_tampered() {
    let params = json!({"name": "bob", "password": "pw", "secureCode": "123456"});
    let valid = md5_over(&params, &["name", "password", "secureCode"]);
    let mut tampered = valid.clone().into_bytes();
    tampered[0] = if tampered[0] == b'a' { b'b' } else { b'a' };
    let tampered = String::from_utf8(tampered).unwrap();

    let pipeline = pipeline(aes_material());
    let send = |sign: Option<&str>| {
        let mut body = params.clone();
        if let Some(sign) = sign {
            body["sign"] = json!(sign);
        }
        http::Request::builder()
            .method("POST")
            .uri("/user/login")
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    };

    let response = pipeline
        .process(
            MiddlewareContext::for_operation("user.login"),
            send(Some(&valid)),
            echo_handler(&["name"]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(envelope(response).await.data, json!({"name": "bob"}));

    let response = pipeline
        .process(
            MiddlewareContext::for_operation("user.login"),
            send(Some(&tampered)),
            echo_handler(&["name"]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));
    let rejected = envelope(response).await;
    assert!(!rejected.success);
    assert_eq!(rejected.code, 4010);

    let response = pipeline
        .process(
            MiddlewareContext::for_operation("user.login"),
            send(None),
            echo_handler(&["name"]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(envelope(response).await.code, 4000);
}

#[tokio::test]
async fn rsa_split_fields_decrypt_and_encrypt() {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = RsaPublicKey::from(&private);
    let material = SecretMaterial::new("X1").with_rsa(RsaMaterial {
        user_public_key: Some(public.to_public_key_pem(LineEnding::LF).unwrap()),
        server_public_key: None,
        server_private_key: Some(private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()),
    });
    let to_server = Cipher::outbound(CipherAlgorithm::Rsa, &material, RsaPadding::Pkcs1v15).unwrap();
    let from_server = Cipher::inbound(CipherAlgorithm::Rsa, &material, RsaPadding::Pkcs1v15).unwrap();

    let body = json!({
        "name": "bob",
        "password": to_server.encrypt(b"pw").unwrap(),
        "profile": to_server.encrypt(br#"{"age":3}"#).unwrap(),
    });
    let request = http::Request::builder()
        .method("POST")
        .uri("/user/register")
        .header("content-type", "application/json")
        .header("x-app-id", APP_ID_HEADER)
        .header("x-crypto-type", "rsa")
        .header("x-cipher", STANDARD.encode(r#"["password","json:profile"]"#))
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap();

    let response = pipeline(material)
        .process(
            MiddlewareContext::for_operation("user.register"),
            request,
            echo_handler(&["name", "password", "profile"]),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-crypto-type"], "rsa");
    let envelope = envelope(response).await;
    let data = envelope.data_object().unwrap();

    assert_eq!(data["name"], json!("bob"));
    let password = from_server.decrypt(data["password"].as_str().unwrap()).unwrap();
    assert_eq!(password, b"pw");
    let profile = from_server.decrypt(data["profile"].as_str().unwrap()).unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&profile).unwrap(), json!({"age": 3}));
}

#[tokio::test]
async fn bad_ciphertext_is_a_crypto_failure() {
    let request = http::Request::builder()
        .method("POST")
        .uri("/user/profile")
        .header("content-type", "application/json")
        .header("x-app-id", APP_ID_HEADER)
        .header("x-cipher", "cipher")
        .body(Full::new(Bytes::from(r#"{"ciphertext":"AAAA"}"#)))
        .unwrap();

    let response = pipeline(aes_material())
        .process(
            MiddlewareContext::for_operation("user.profile"),
            request,
            echo_handler(&["name"]),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["x-crypto-type"], "aes");
    assert_eq!(envelope(response).await.code, 4002);
}

#[tokio::test]
async fn unknown_app_is_forbidden() {
    let request = http::Request::builder()
        .method("POST")
        .uri("/user/profile")
        .header("x-app-id", STANDARD.encode("nobody"))
        .header("x-cipher", "cipher")
        .body(Full::new(Bytes::from_static(b"AAAA")))
        .unwrap();

    let response = pipeline(aes_material())
        .process(
            MiddlewareContext::for_operation("user.profile"),
            request,
            echo_handler(&["name"]),
        )
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(envelope(response).await.code, 4030);
}

#[tokio::test]
async fn bare_handler_errors_are_normalized() {
    let request = http::Request::builder()
        .uri("/missing")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = pipeline(aes_material())
        .process(MiddlewareContext::new(), request, |_ctx, _req| {
            Box::pin(async {
                http::Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Full::new(Bytes::new()))
                    .unwrap()
            })
        })
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key("x-request-id"));
    let envelope = envelope(response).await;
    assert!(!envelope.success);
    assert_eq!(envelope.message, "Not Found");
}

#[test]
fn standard_pipeline_runs_stages_in_order() {
    let pipeline = pipeline(aes_material());
    let expected: Vec<&str> = Stage::all().iter().map(|stage| stage.name()).collect();
    assert_eq!(pipeline.stage_names(), expected);
    assert_eq!(pipeline.stage_count(), 5);
}

fn login_params() -> Value {
    json!({"name": "bob", "password": "pw", "secureCode": "123456"})
}

fn login_request(body: &Value, headers: &[(&str, &str)]) -> Request {
    let mut builder = http::Request::builder()
        .method("POST")
        .uri("/user/login")
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(Bytes::from(body.to_string()))).unwrap()
}

async fn run_login(pipeline: &Pipeline, request: Request) -> Response {
    pipeline
        .process(
            MiddlewareContext::for_operation("user.login"),
            request,
            echo_handler(&["name", "password"]),
        )
        .await
}

#[tokio::test]
async fn encrypted_login_is_verified_over_plaintext() {
    let sealed = client_aes().encrypt(b"pw").unwrap();
    let cipher_header = STANDARD.encode(r#"["password"]"#);
    let headers = [
        ("x-app-id", APP_ID_HEADER),
        ("x-cipher", cipher_header.as_str()),
    ];
    let pipeline = pipeline(aes_material());

    let mut body = login_params();
    body["sign"] = json!(md5_over(&login_params(), &["name", "password", "secureCode"]));
    body["password"] = json!(sealed);
    let response = run_login(&pipeline, login_request(&body, &headers)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-crypto-type"], "aes");
    let data = envelope(response).await.data;
    assert_eq!(data["name"], json!("bob"));
    // The handler saw "pw"; split mode seals it again on the way out.
    let password = client_aes().decrypt(data["password"].as_str().unwrap()).unwrap();
    assert_eq!(password, b"pw");

    // A signature over the ciphertext does not match the decrypted request.
    let mut over_ciphertext = login_params();
    over_ciphertext["password"] = json!(sealed);
    let mut body = over_ciphertext.clone();
    body["sign"] = json!(md5_over(&over_ciphertext, &["name", "password", "secureCode"]));
    let response = run_login(&pipeline, login_request(&body, &headers)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-crypto-type"], "aes");
    assert_eq!(envelope(response).await.code, 4010);
}

fn with_request_options(options: CanonicalOptions) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.signature.request = options;
    config
}

fn md5_hex(text: &str) -> String {
    SignatureProvider::digest(DigestAlgorithm::Md5)
        .sign(text.as_bytes())
        .unwrap()
}

#[tokio::test]
async fn ascending_order_with_hashed_key_suffix() {
    let pipeline = pipeline_with(
        aes_material(),
        with_request_options(CanonicalOptions {
            order: KeyOrder::Ascending,
            strictness: Strictness::Strict,
            suffix: CanonicalSuffix::HashedKey,
        }),
    );
    let headers = [("x-app-id", APP_ID_HEADER), ("x-request-id", "req-42")];

    let mut params = login_params();
    params["extra"] = json!("z");
    let canonical = format!(
        "extra=z&name=bob&password=pw&secureCode=123456&key={}",
        md5_hex("X1-req-42")
    );
    let mut body = params.clone();
    body["sign"] = json!(md5_hex(&canonical));
    let response = run_login(&pipeline, login_request(&body, &headers)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Declared order without the suffix is the default scheme, not this one.
    let mut body = params.clone();
    body["sign"] = json!(md5_over(&login_params(), &["name", "password", "secureCode"]));
    let response = run_login(&pipeline, login_request(&body, &headers)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The suffix binds the signature to the request id.
    let mut body = params;
    body["sign"] = json!(md5_hex(&canonical));
    let other = [("x-app-id", APP_ID_HEADER), ("x-request-id", "req-43")];
    let response = run_login(&pipeline, login_request(&body, &other)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(envelope(response).await.code, 4010);
}

#[tokio::test]
async fn request_id_and_key_suffix() {
    let pipeline = pipeline_with(
        aes_material(),
        with_request_options(CanonicalOptions {
            order: KeyOrder::Declared,
            strictness: Strictness::Strict,
            suffix: CanonicalSuffix::RequestIdAndKey,
        }),
    );
    let canonical = "name=bob&password=pw&secureCode=123456&requestId=req-7&key=X1";
    let mut body = login_params();
    body["sign"] = json!(md5_hex(canonical));

    let response = run_login(
        &pipeline,
        login_request(&body, &[("x-app-id", APP_ID_HEADER), ("x-request-id", "req-7")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The suffix needs the app id header.
    let response = run_login(
        &pipeline,
        login_request(&body, &[("x-request-id", "req-7")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

fn client_signature(algorithm: SignatureAlgorithm, material: &SecretMaterial) -> String {
    let canonical = CanonicalBuilder::new(KeyOrder::Declared, Strictness::Strict)
        .build(
            login_params().as_object().unwrap(),
            &["name".to_string(), "password".to_string(), "secureCode".to_string()],
            &SuffixContext::default(),
        )
        .unwrap();
    SignatureProvider::for_signing(algorithm, Some(material), DigestAlgorithm::Sha256)
        .unwrap()
        .sign(canonical.as_bytes())
        .unwrap()
}

#[tokio::test]
async fn aes_mac_request_signature() {
    let pipeline = pipeline(aes_material());
    let headers = [("x-app-id", APP_ID_HEADER), ("x-sign-type", "aes")];

    let mut body = login_params();
    body["sign"] = json!(client_signature(SignatureAlgorithm::Aes, &aes_material()));
    let response = run_login(&pipeline, login_request(&body, &headers)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-sign-type"], "aes");

    body["secureCode"] = json!("654321");
    let response = run_login(&pipeline, login_request(&body, &headers)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rsa_request_signature_uses_user_public_key() {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = RsaPublicKey::from(&private);
    let server_side = SecretMaterial::new("X1").with_rsa(RsaMaterial {
        user_public_key: Some(public.to_public_key_pem(LineEnding::LF).unwrap()),
        server_public_key: None,
        server_private_key: None,
    });
    let client_side = SecretMaterial::new("X1").with_rsa(RsaMaterial {
        user_public_key: None,
        server_public_key: None,
        server_private_key: Some(private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()),
    });
    let pipeline = pipeline(server_side);
    let headers = [("x-app-id", APP_ID_HEADER), ("x-sign-type", "rsa")];

    let mut body = login_params();
    body["sign"] = json!(client_signature(SignatureAlgorithm::Rsa, &client_side));
    let response = run_login(&pipeline, login_request(&body, &headers)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-sign-type"], "rsa");

    body["name"] = json!("eve");
    let response = run_login(&pipeline, login_request(&body, &headers)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(envelope(response).await.code, 4010);
}

#[tokio::test]
async fn cipher_header_without_rule_passes_through() {
    let request = http::Request::builder()
        .method("POST")
        .uri("/user/unruled")
        .header("content-type", "application/json")
        .header("x-cipher", "cipher")
        .body(Full::new(Bytes::from(r#"{"ciphertext":"not-base64"}"#)))
        .unwrap();

    let response = pipeline(aes_material())
        .process(
            MiddlewareContext::for_operation("user.unruled"),
            request,
            echo_handler(&["ciphertext"]),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("x-crypto-type"));
    assert_eq!(envelope(response).await.data, json!({"ciphertext": "not-base64"}));
}
