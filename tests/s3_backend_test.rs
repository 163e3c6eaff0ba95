#![cfg(feature = "integration")]

use hyper::{body::to_bytes, header, Body, Method, Request, Response, StatusCode};
use std::{io::Read, sync::Arc};
use testcontainers::{
    clients::Cli,
    images::generic::{GenericImage, Stream, WaitFor},
    Container, Docker, Image, RunArgs,
};
use webdav_gw::{
    backend::{factory::ClientFactory, MIB},
    dav::{upload::UploadConfig, DavHandler},
    repository::{Backend, MemoryRepository, Mount, S3Authentication, Secret, StorageConfig},
};

struct ContainerDrop<'d, D: Docker, I: Image> {
    container: Container<'d, D, I>,
}

impl<'d, D: Docker, I: Image> Drop for ContainerDrop<'d, D, I> {
    fn drop(&mut self) {
        self.container.stop();

        let mut container_stdout = String::new();
        let _ = self
            .container
            .logs()
            .stdout
            .read_to_string(&mut container_stdout);
        let mut container_stderr = String::new();
        let _ = self
            .container
            .logs()
            .stderr
            .read_to_string(&mut container_stderr);

        println!("container stdout: {}", container_stdout);
        println!("container stderr: {}", container_stderr);

        self.container.rm();
    }
}

fn minio() -> (GenericImage, RunArgs) {
    let args = RunArgs::default().with_mapped_port((9000, 9000));
    let image = GenericImage::new("minio/minio")
        .with_wait_for(WaitFor::LogMessage {
            message: "Detected default credentials".into(),
            stream: Stream::StdOut,
        })
        .with_args(vec!["server".into(), "/data".into()]);
    (image, args)
}

fn handler(path_style: bool) -> DavHandler {
    let repository = MemoryRepository::new();
    repository
        .add_storage(StorageConfig {
            id: "minio".into(),
            name: None,
            root_folder: Some("gw".into()),
            public: false,
            quota_bytes: None,
            backend: Backend::S3 {
                url: Some("http://localhost:9000".into()),
                region: "us-east-1".into(),
                bucket: "test".into(),
                path_style,
                ensure_bucket: true,
                auth: S3Authentication::Values {
                    access_key: "minioadmin".into(),
                    secret_key: Secret::Plain("minioadmin".into()),
                },
            },
        })
        .unwrap();
    repository
        .add_mount(Mount::new("s3", "/s3", "minio"))
        .unwrap();

    DavHandler::builder()
        .repository(Arc::new(repository))
        .client_factory(Arc::new(ClientFactory::new(None)))
        .upload_config(UploadConfig {
            retry_base_delay_ms: 10,
            ..UploadConfig::default()
        })
        .build_handler()
}

async fn call(dav: &DavHandler, method: &str, uri: &str, body: Vec<u8>) -> Response<Body> {
    let mut req = Request::builder()
        .method(Method::from_bytes(method.as_bytes()).unwrap())
        .uri(uri);
    if !body.is_empty() {
        req = req.header(header::CONTENT_LENGTH, body.len());
    }
    dav.handle(req.body(Body::from(body)).unwrap()).await
}

async fn exercise(dav: &DavHandler) {
    assert_eq!(
        call(dav, "MKCOL", "/s3/docs/", vec![]).await.status(),
        StatusCode::CREATED
    );
    assert_eq!(
        call(dav, "PUT", "/s3/docs/readme.txt", b"0123456789abcdef".to_vec())
            .await
            .status(),
        StatusCode::CREATED
    );
    assert_eq!(
        call(dav, "PUT", "/s3/docs/big.bin", vec![3; 12 * MIB])
            .await
            .status(),
        StatusCode::CREATED
    );

    let resp = call(dav, "PROPFIND", "/s3/docs/", vec![]).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let xml = String::from_utf8(to_bytes(resp.into_body()).await.unwrap().to_vec()).unwrap();
    assert!(xml.contains("<D:href>/s3/docs/readme.txt</D:href>"));
    assert!(xml.contains(&format!("<D:getcontentlength>{}</D:getcontentlength>", 12 * MIB)));

    let resp = dav
        .handle(
            Request::get("/s3/docs/readme.txt")
                .header(header::RANGE, "bytes=10-")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(&to_bytes(resp.into_body()).await.unwrap()[..], b"abcdef");

    assert_eq!(
        call(dav, "DELETE", "/s3/docs/", vec![]).await.status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        call(dav, "GET", "/s3/docs/readme.txt", vec![]).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn s3_backend_minio() {
    webdav_gw::configuration::setup_tracing();

    let docker = Cli::default();
    let (image, args) = minio();
    let image = image.with_env_var("MINIO_DOMAIN", "localhost");
    let _cont = ContainerDrop {
        container: docker.run_with_args(image, args),
    };

    exercise(&handler(false)).await;
}

#[tokio::test]
async fn s3_backend_minio_pathstyle() {
    webdav_gw::configuration::setup_tracing();

    let docker = Cli::default();
    let (image, args) = minio();
    let _cont = ContainerDrop {
        container: docker.run_with_args(image, args),
    };

    exercise(&handler(true)).await;
}
