use crate::backend::{BackendError, BackendResult};
use s3::{creds::Credentials, region::Region, Bucket, BucketConfiguration};
use tracing::{debug, error, instrument};

/// Connection parameters of one S3 storage configuration, credentials
/// already in plain text.
#[derive(derivative::Derivative, Clone)]
#[derivative(Debug)]
pub struct S3Settings {
    pub url: Option<String>,
    pub region: String,
    pub bucket: String,
    pub path_style: bool,
    pub ensure_bucket: bool,
    /// `None` reads credentials from the environment.
    #[derivative(Debug = "ignore")]
    pub keys: Option<(String, String)>,
}

impl S3Settings {
    pub fn region(&self) -> BackendResult<Region> {
        match &self.url {
            Some(url) => Ok(Region::Custom {
                region: self.region.clone(),
                endpoint: url.clone(),
            }),
            None => self
                .region
                .parse()
                .map_err(|_| BackendError::Config(format!("unknown region {}", self.region))),
        }
    }

    pub fn credentials(&self) -> BackendResult<Credentials> {
        let creds = match &self.keys {
            Some((access, secret)) => {
                Credentials::new(Some(access.as_str()), Some(secret.as_str()), None, None, None)
            }
            None => Credentials::from_env(),
        };
        creds.map_err(|e| BackendError::Config(format!("s3 credentials: {}", e)))
    }

    pub fn bucket(&self) -> BackendResult<Bucket> {
        let bucket = Bucket::new(&self.bucket, self.region()?, self.credentials()?)?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

/// Creates the bucket, an already existing bucket is fine.
#[instrument(level = "debug", skip(settings), fields(bucket = %settings.bucket))]
pub async fn ensure_bucket(settings: &S3Settings) -> BackendResult<()> {
    let config = BucketConfiguration::private();
    let region = settings.region()?;
    let creds = settings.credentials()?;
    let resp = if settings.path_style {
        Bucket::create_with_path_style(&settings.bucket, region, creds, config).await?
    } else {
        Bucket::create(&settings.bucket, region, creds, config).await?
    };
    if !resp.success() && resp.response_code != 409 {
        error!(response_code = resp.response_code, response_text = %resp.response_text);
        return Err(BackendError::status(
            resp.response_code,
            "can't create bucket",
        ));
    }
    debug!(response_code = resp.response_code, "bucket ready");
    Ok(())
}
