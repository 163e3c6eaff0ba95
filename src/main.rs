use anyhow::{anyhow, Context, Result};
use clap::{App, Arg, SubCommand};
use webdav_gw::{
    application::Application,
    backend::encryption::CredentialCipher,
    configuration::{setup_tracing, Configuration},
};

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let matches = App::new("webdav_gw")
        .version("0.1")
        .about("WebDAV gateway over S3 compatible and WebDAV storages")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("sets custom config file")
                .takes_value(true),
        )
        .subcommand(
            SubCommand::with_name("encrypt")
                .about("encrypts a storage credential with the configured secret")
                .arg(
                    Arg::with_name("VALUE")
                        .help("plain text credential")
                        .required(true)
                        .index(1),
                ),
        )
        .get_matches();

    let config = matches.value_of("config").unwrap_or("webdav_gw.yml");
    let config = Configuration::new(config).context("can't get configuration")?;

    if let Some(sub) = matches.subcommand_matches("encrypt") {
        let secret = config
            .app
            .secret
            .as_deref()
            .ok_or_else(|| anyhow!("app.secret is not configured"))?;
        let cipher = CredentialCipher::from_secret(secret)?;
        let value = sub.value_of("VALUE").unwrap_or_default();
        println!("{}", cipher.encrypt(value));
        return Ok(());
    }

    Application::build(config)?.run().await;
    Ok(())
}
