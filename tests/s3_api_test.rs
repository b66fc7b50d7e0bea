//! End-to-end S3 API behaviour: bucket and object CRUD, conditionals,
//! ranges, listings, and ACLs.

mod common;

use common::TestServer;

#[tokio::test]
async fn test_bucket_lifecycle() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let resp = client.send("PUT", "/lifecycle", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("location").unwrap(), "/lifecycle");

    // Idempotent for the same owner.
    let resp = client.send("PUT", "/lifecycle", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);

    let resp = client.send("HEAD", "/lifecycle", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("x-amz-bucket-region").unwrap(),
        "us-east-1"
    );

    let resp = client.send("GET", "/lifecycle?location", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("<LocationConstraint"));

    let resp = client.send("DELETE", "/lifecycle", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 204);

    let resp = client.send("HEAD", "/lifecycle", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_invalid_bucket_names_rejected() {
    let server = TestServer::spawn().await;
    let client = server.client();

    for name in ["ab", "UPPER", "192.168.1.1", "xn--foo", "trailing-"] {
        let resp = client
            .send("PUT", &format!("/{name}"), Vec::new(), &[])
            .await;
        assert_eq!(resp.status(), 400, "bucket name {name}");
        let body = resp.text().await.unwrap();
        assert!(body.contains("<Code>InvalidBucketName</Code>"));
    }
}

#[tokio::test]
async fn test_delete_nonempty_bucket_conflicts() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/full-bucket", Vec::new(), &[]).await;
    client
        .send("PUT", "/full-bucket/obj", b"data".to_vec(), &[])
        .await;

    let resp = client.send("DELETE", "/full-bucket", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 409);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>BucketNotEmpty</Code>"));

    client.send("DELETE", "/full-bucket/obj", Vec::new(), &[]).await;
    let resp = client.send("DELETE", "/full-bucket", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn test_object_round_trip() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/rt-bucket", Vec::new(), &[]).await;

    let resp = client
        .send(
            "PUT",
            "/rt-bucket/greeting.txt",
            b"hello world".to_vec(),
            &[
                ("content-type", "text/plain"),
                ("x-amz-meta-Author", "Tester"),
            ],
        )
        .await;
    assert_eq!(resp.status(), 200);
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();
    // MD5("hello world")
    assert_eq!(etag, "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"");

    let resp = client
        .send("GET", "/rt-bucket/greeting.txt", Vec::new(), &[])
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("etag").unwrap().to_str().unwrap(), etag);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/plain"
    );
    // User metadata keys come back lowercased.
    assert_eq!(resp.headers().get("x-amz-meta-author").unwrap(), "Tester");
    assert_eq!(resp.headers().get("accept-ranges").unwrap(), "bytes");
    assert_eq!(resp.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_object_overwrite_last_wins() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/ow-bucket", Vec::new(), &[]).await;
    client.send("PUT", "/ow-bucket/k", b"v1".to_vec(), &[]).await;
    client.send("PUT", "/ow-bucket/k", b"v2".to_vec(), &[]).await;

    let resp = client.send("GET", "/ow-bucket/k", Vec::new(), &[]).await;
    assert_eq!(resp.text().await.unwrap(), "v2");
}

#[tokio::test]
async fn test_empty_object_round_trips() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/empty-bucket", Vec::new(), &[]).await;
    let resp = client.send("PUT", "/empty-bucket/empty", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("etag").unwrap(),
        "\"d41d8cd98f00b204e9800998ecf8427e\""
    );

    let resp = client.send("GET", "/empty-bucket/empty", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-length").unwrap(), "0");
    assert!(resp.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_object_idempotent() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/del-bucket", Vec::new(), &[]).await;
    client.send("PUT", "/del-bucket/k", b"v".to_vec(), &[]).await;

    let resp = client.send("DELETE", "/del-bucket/k", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 204);
    let resp = client.send("DELETE", "/del-bucket/k", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 204);

    let resp = client.send("GET", "/del-bucket/k", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 404);
    assert!(resp.text().await.unwrap().contains("<Code>NoSuchKey</Code>"));
}

#[tokio::test]
async fn test_key_length_limits() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/key-bucket", Vec::new(), &[]).await;

    let key_1024 = "k".repeat(1024);
    let resp = client
        .send("PUT", &format!("/key-bucket/{key_1024}"), b"v".to_vec(), &[])
        .await;
    assert_eq!(resp.status(), 200);

    let key_1025 = "k".repeat(1025);
    let resp = client
        .send("PUT", &format!("/key-bucket/{key_1025}"), b"v".to_vec(), &[])
        .await;
    assert_eq!(resp.status(), 400);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>KeyTooLongError</Code>"));
}

#[tokio::test]
async fn test_content_md5_checked() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/md5-bucket", Vec::new(), &[]).await;

    // base64(MD5("")), deliberately wrong for this body.
    let resp = client
        .send(
            "PUT",
            "/md5-bucket/k",
            b"actual content".to_vec(),
            &[("content-md5", "1B2M2Y8AsgTpgAmY7PhCfg==")],
        )
        .await;
    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.unwrap().contains("<Code>BadDigest</Code>"));

    let resp = client
        .send(
            "PUT",
            "/md5-bucket/k",
            b"x".to_vec(),
            &[("content-md5", "!!not base64!!")],
        )
        .await;
    assert_eq!(resp.status(), 400);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>InvalidDigest</Code>"));

    // The failed writes left nothing behind.
    let resp = client.send("GET", "/md5-bucket/k", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_conditional_get_and_put() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/cond-bucket", Vec::new(), &[]).await;
    let resp = client.send("PUT", "/cond-bucket/k", b"v".to_vec(), &[]).await;
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    // GET with a matching If-None-Match: 304 carrying the validator.
    let resp = client
        .send("GET", "/cond-bucket/k", Vec::new(), &[("if-none-match", &etag)])
        .await;
    assert_eq!(resp.status(), 304);
    assert_eq!(resp.headers().get("etag").unwrap().to_str().unwrap(), etag);

    // Mutating PUT with a matching If-None-Match: 412.
    let resp = client
        .send(
            "PUT",
            "/cond-bucket/k",
            b"v2".to_vec(),
            &[("if-none-match", &etag)],
        )
        .await;
    assert_eq!(resp.status(), 412);

    // GET with a non-matching If-Match: 412.
    let resp = client
        .send(
            "GET",
            "/cond-bucket/k",
            Vec::new(),
            &[("if-match", "\"0000000000000000000000000000dead\"")],
        )
        .await;
    assert_eq!(resp.status(), 412);

    // If-Match wildcard proceeds.
    let resp = client
        .send("GET", "/cond-bucket/k", Vec::new(), &[("if-match", "*")])
        .await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_range_requests() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/range-bucket", Vec::new(), &[]).await;
    client
        .send(
            "PUT",
            "/range-bucket/alpha",
            b"abcdefghijklmnopqrstuvwxyz".to_vec(),
            &[],
        )
        .await;

    // Suffix range: last five bytes.
    let resp = client
        .send("GET", "/range-bucket/alpha", Vec::new(), &[("range", "bytes=-5")])
        .await;
    assert_eq!(resp.status(), 206);
    assert_eq!(
        resp.headers().get("content-range").unwrap(),
        "bytes 21-25/26"
    );
    assert_eq!(resp.headers().get("content-length").unwrap(), "5");
    assert_eq!(resp.text().await.unwrap(), "vwxyz");

    // Bounded range.
    let resp = client
        .send("GET", "/range-bucket/alpha", Vec::new(), &[("range", "bytes=0-3")])
        .await;
    assert_eq!(resp.status(), 206);
    assert_eq!(resp.text().await.unwrap(), "abcd");

    // Open-ended range with end clamped.
    let resp = client
        .send(
            "GET",
            "/range-bucket/alpha",
            Vec::new(),
            &[("range", "bytes=20-99")],
        )
        .await;
    assert_eq!(resp.status(), 206);
    assert_eq!(resp.text().await.unwrap(), "uvwxyz");

    // Start beyond the object: 416 with the span advertisement.
    let resp = client
        .send(
            "GET",
            "/range-bucket/alpha",
            Vec::new(),
            &[("range", "bytes=99-")],
        )
        .await;
    assert_eq!(resp.status(), 416);
    assert_eq!(resp.headers().get("content-range").unwrap(), "bytes */26");
}

#[tokio::test]
async fn test_list_objects_v1_and_v2() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/list-bucket", Vec::new(), &[]).await;
    for key in ["docs/a.txt", "docs/b.txt", "images/c.png", "readme.md"] {
        client
            .send("PUT", &format!("/list-bucket/{key}"), b"x".to_vec(), &[])
            .await;
    }

    // V2 with delimiter folds directories into common prefixes.
    let resp = client
        .send("GET", "/list-bucket?list-type=2&delimiter=%2F", Vec::new(), &[])
        .await;
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<Prefix>docs/</Prefix>"));
    assert!(body.contains("<Prefix>images/</Prefix>"));
    assert!(body.contains("<Key>readme.md</Key>"));
    assert!(!body.contains("<Key>docs/a.txt</Key>"));
    assert!(body.contains("<KeyCount>3</KeyCount>"));

    // V1 pagination with max-keys.
    let resp = client
        .send("GET", "/list-bucket?max-keys=2", Vec::new(), &[])
        .await;
    let body = resp.text().await.unwrap();
    assert!(body.contains("<IsTruncated>true</IsTruncated>"));
    assert!(body.contains("<NextMarker>docs/b.txt</NextMarker>"));

    // Continue from the marker.
    let resp = client
        .send("GET", "/list-bucket?marker=docs%2Fb.txt", Vec::new(), &[])
        .await;
    let body = resp.text().await.unwrap();
    assert!(body.contains("<Key>images/c.png</Key>"));
    assert!(body.contains("<Key>readme.md</Key>"));
    assert!(!body.contains("<Key>docs/a.txt</Key>"));

    // V2 continuation token.
    let resp = client
        .send("GET", "/list-bucket?list-type=2&max-keys=3", Vec::new(), &[])
        .await;
    let body = resp.text().await.unwrap();
    assert!(body.contains("<IsTruncated>true</IsTruncated>"));
    assert!(body.contains("<NextContinuationToken>images/c.png</NextContinuationToken>"));

    let resp = client
        .send(
            "GET",
            "/list-bucket?list-type=2&continuation-token=images%2Fc.png",
            Vec::new(),
            &[],
        )
        .await;
    let body = resp.text().await.unwrap();
    assert!(body.contains("<Key>readme.md</Key>"));
    assert!(body.contains("<KeyCount>1</KeyCount>"));
}

#[tokio::test]
async fn test_copy_object() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/copy-src", Vec::new(), &[]).await;
    client.send("PUT", "/copy-dst", Vec::new(), &[]).await;
    client
        .send(
            "PUT",
            "/copy-src/original",
            b"copy me".to_vec(),
            &[("x-amz-meta-origin", "source")],
        )
        .await;

    let resp = client
        .send(
            "PUT",
            "/copy-dst/duplicate",
            Vec::new(),
            &[("x-amz-copy-source", "/copy-src/original")],
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<CopyObjectResult"));
    assert!(body.contains("<ETag>"));

    // COPY directive preserves source metadata.
    let resp = client
        .send("GET", "/copy-dst/duplicate", Vec::new(), &[])
        .await;
    assert_eq!(resp.headers().get("x-amz-meta-origin").unwrap(), "source");
    assert_eq!(resp.text().await.unwrap(), "copy me");

    // REPLACE directive swaps metadata.
    let resp = client
        .send(
            "PUT",
            "/copy-dst/replaced",
            Vec::new(),
            &[
                ("x-amz-copy-source", "/copy-src/original"),
                ("x-amz-metadata-directive", "REPLACE"),
                ("x-amz-meta-origin", "replacement"),
            ],
        )
        .await;
    assert_eq!(resp.status(), 200);
    let resp = client.send("GET", "/copy-dst/replaced", Vec::new(), &[]).await;
    assert_eq!(
        resp.headers().get("x-amz-meta-origin").unwrap(),
        "replacement"
    );

    // Copying a missing source is NoSuchKey.
    let resp = client
        .send(
            "PUT",
            "/copy-dst/nothing",
            Vec::new(),
            &[("x-amz-copy-source", "/copy-src/missing")],
        )
        .await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_delete_objects_batch() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/batch-bucket", Vec::new(), &[]).await;
    for key in ["a", "b", "c"] {
        client
            .send("PUT", &format!("/batch-bucket/{key}"), b"x".to_vec(), &[])
            .await;
    }

    let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<Delete>
  <Object><Key>a</Key></Object>
  <Object><Key>b</Key></Object>
  <Object><Key>never-existed</Key></Object>
</Delete>"#;
    let resp = client
        .send("POST", "/batch-bucket?delete", body.to_vec(), &[])
        .await;
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("<Key>a</Key>"));
    assert!(text.contains("<Key>never-existed</Key>"));

    let resp = client.send("GET", "/batch-bucket/a", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 404);
    let resp = client.send("GET", "/batch-bucket/c", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);

    // Garbage body is MalformedXML.
    let resp = client
        .send("POST", "/batch-bucket?delete", b"<<<garbage".to_vec(), &[])
        .await;
    assert_eq!(resp.status(), 400);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>MalformedXML</Code>"));
}

#[tokio::test]
async fn test_acl_round_trip() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client
        .send(
            "PUT",
            "/acl-bucket",
            Vec::new(),
            &[("x-amz-acl", "public-read")],
        )
        .await;

    let resp = client.send("GET", "/acl-bucket?acl", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<AccessControlPolicy"));
    assert!(body.contains("AllUsers"));
    assert!(body.contains("<Permission>READ</Permission>"));

    client.send("PUT", "/acl-bucket/obj", b"x".to_vec(), &[]).await;
    let resp = client
        .send(
            "PUT",
            "/acl-bucket/obj?acl",
            Vec::new(),
            &[("x-amz-acl", "private")],
        )
        .await;
    assert_eq!(resp.status(), 200);

    let resp = client.send("GET", "/acl-bucket/obj?acl", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<Permission>FULL_CONTROL</Permission>"));
    assert!(!body.contains("AllUsers"));
}

#[tokio::test]
async fn test_head_object_matches_get() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/head-bucket", Vec::new(), &[]).await;
    client
        .send("PUT", "/head-bucket/k", b"12345".to_vec(), &[])
        .await;

    let resp = client.send("HEAD", "/head-bucket/k", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-length").unwrap(), "5");
    assert!(resp.headers().contains_key("etag"));
    assert!(resp.headers().contains_key("last-modified"));

    let resp = client.send("HEAD", "/head-bucket/missing", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_missing_bucket_errors() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let resp = client.send("GET", "/ghost-bucket/key", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 404);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("<Code>NoSuchBucket</Code>"));

    let resp = client.send("GET", "/ghost-bucket", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 404);

    let resp = client.send("DELETE", "/ghost-bucket", Vec::new(), &[]).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_response_header_overrides() {
    let server = TestServer::spawn().await;
    let client = server.client();

    client.send("PUT", "/override-bucket", Vec::new(), &[]).await;
    client
        .send(
            "PUT",
            "/override-bucket/doc",
            b"x".to_vec(),
            &[("content-type", "application/octet-stream")],
        )
        .await;

    let resp = client
        .send(
            "GET",
            "/override-bucket/doc?response-content-type=text%2Fhtml&response-cache-control=no-store",
            Vec::new(),
            &[],
        )
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/html");
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
}
