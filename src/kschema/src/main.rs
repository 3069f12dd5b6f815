// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Encodes and decodes Confluent wire format messages from the command line.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use kschema_ccsr::tls::{Certificate, Identity};
use kschema_ccsr::{Client, ClientConfig, SchemaType};
use kschema_interchange::{
    CodecConfig, ConfluentCodec, RegistrationMode, SchemaDefinition, SchemaEngines,
    SubjectNameStrategy,
};
use tracing::{debug, error};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static ENV_FILTER: &str = "kschema=info";

#[derive(Parser, Debug)]
#[clap(name = "kschema", next_line_help = true, version)]
struct Args {
    #[clap(subcommand)]
    command: Command,
    /// The URL of the schema registry. Credentials embedded in the URL are
    /// used unless `--username` is given.
    #[clap(
        long,
        env = "KSCHEMA_REGISTRY_URL",
        default_value = "http://localhost:8081",
        global = true
    )]
    registry_url: String,
    /// The username for basic authentication against the registry.
    #[clap(long, env = "KSCHEMA_REGISTRY_USERNAME", global = true)]
    username: Option<String>,
    /// The password for basic authentication against the registry.
    #[clap(long, env = "KSCHEMA_REGISTRY_PASSWORD", global = true)]
    password: Option<String>,
    /// A PEM file of an additional root certificate to trust.
    #[clap(long, global = true)]
    root_cert: Option<PathBuf>,
    /// PEM files of the client key and certificate to present, in that order.
    #[clap(long, num_args = 2, value_names = ["KEY", "CERT"], global = true)]
    identity: Option<Vec<PathBuf>>,
    /// The registry request timeout, in seconds.
    #[clap(long, default_value = "60", global = true)]
    timeout_secs: u64,
    /// Which log messages to emit, in `RUST_LOG` syntax.
    #[clap(long, default_value = ENV_FILTER, global = true)]
    log_filter: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a JSON message, printing the framed bytes as hex.
    Encode(EncodeArgs),
    /// Decode hex-encoded framed bytes, printing the message as JSON.
    Decode {
        /// The framed message, hex-encoded.
        hex: String,
    },
    /// Inspect the schema registry.
    #[clap(subcommand)]
    Schema(SchemaCommand),
}

#[derive(Parser, Debug)]
struct EncodeArgs {
    /// The message, as JSON.
    message: String,
    /// Encode with the schema registered under this ID.
    #[clap(long, conflicts_with_all = ["schema", "schema_file", "topic"])]
    id: Option<u32>,
    /// The schema definition to encode with.
    #[clap(long, conflicts_with = "schema_file")]
    schema: Option<String>,
    /// A file holding the schema definition to encode with.
    #[clap(long)]
    schema_file: Option<PathBuf>,
    /// The type of the schema definition.
    #[clap(long, default_value = "AVRO")]
    schema_type: SchemaType,
    /// The subject to register the schema under, or, without a schema, the
    /// subject whose latest schema to encode with.
    #[clap(long, conflicts_with = "topic")]
    subject: Option<String>,
    /// Derive the subject from this topic with the naming strategy.
    #[clap(long)]
    topic: Option<String>,
    /// Encode the message as a key rather than a value.
    #[clap(long, requires = "topic")]
    key: bool,
    /// How subjects are derived from topics.
    #[clap(long, default_value = "TopicNameStrategy")]
    naming_strategy: SubjectNameStrategy,
    /// How the schema obtains its ID.
    #[clap(long, value_enum, default_value_t = Registration::Register)]
    registration: Registration,
}

#[derive(Subcommand, Debug)]
enum SchemaCommand {
    /// Print the schema with the given ID.
    Get {
        #[clap(long)]
        id: u32,
    },
    /// Print the latest schema registered under a subject.
    Latest {
        #[clap(long)]
        subject: String,
    },
    /// List all subjects.
    Subjects,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Registration {
    Register,
    CheckThenRegister,
    LookupExisting,
}

impl From<Registration> for RegistrationMode {
    fn from(registration: Registration) -> RegistrationMode {
        match registration {
            Registration::Register => RegistrationMode::Register,
            Registration::CheckThenRegister => RegistrationMode::CheckThenRegister,
            Registration::LookupExisting => RegistrationMode::LookupExisting,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_filter).unwrap_or_else(|e| {
        eprintln!("kschema: invalid --log-filter {:?}: {}", args.log_filter, e);
        process::exit(2);
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();

    if let Err(err) = run(args).await {
        error!("kschema: fatal: {:#}", err);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    let client = build_client(&args).await?;
    match args.command {
        Command::Encode(encode) => {
            let bytes = run_encode(client, encode).await?;
            println!("{}", hex::encode(bytes));
        }
        Command::Decode { hex } => {
            let bytes = hex::decode(hex.trim()).context("decoding hex input")?;
            let codec = ConfluentCodec::new(Arc::new(client));
            let message = codec.decode(&bytes).await?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        Command::Schema(SchemaCommand::Get { id }) => {
            let schema = client.get_schema_by_id(id).await?;
            debug!("schema {} has type {}", schema.id, schema.schema_type);
            println!("{}", schema.raw);
        }
        Command::Schema(SchemaCommand::Latest { subject }) => {
            let subject = client.get_latest_schema(&subject).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "subject": subject.name,
                    "version": subject.version,
                    "id": subject.schema.id,
                    "schemaType": subject.schema.schema_type.to_string(),
                    "schema": subject.schema.raw,
                }))?
            );
        }
        Command::Schema(SchemaCommand::Subjects) => {
            for subject in client.list_subjects().await? {
                println!("{}", subject);
            }
        }
    }
    Ok(())
}

async fn build_client(args: &Args) -> Result<Client, anyhow::Error> {
    let mut config = ClientConfig::from_url_str(&args.registry_url)?
        .timeout(Duration::from_secs(args.timeout_secs));
    if let Some(username) = &args.username {
        config = config.auth(username.clone(), args.password.clone());
    }
    if let Some(path) = &args.root_cert {
        let pem = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading root certificate {}", path.display()))?;
        config = config.add_root_certificate(Certificate::from_pem(&pem)?);
    }
    if let Some(paths) = &args.identity {
        let [key, cert] = paths.as_slice() else {
            bail!("--identity requires a key file and a certificate file");
        };
        let key_pem = tokio::fs::read(key)
            .await
            .with_context(|| format!("reading client key {}", key.display()))?;
        let cert_pem = tokio::fs::read(cert)
            .await
            .with_context(|| format!("reading client certificate {}", cert.display()))?;
        config = config.identity(Identity::from_pem(&key_pem, &cert_pem)?);
    }
    config.build()
}

async fn run_encode(client: Client, args: EncodeArgs) -> Result<Vec<u8>, anyhow::Error> {
    let message: serde_json::Value =
        serde_json::from_str(&args.message).context("parsing message as JSON")?;
    let config = CodecConfig::default()
        .naming_strategy(args.naming_strategy)
        .registration_mode(args.registration.into());
    let codec = ConfluentCodec::with_config(Arc::new(client), SchemaEngines::default(), config);

    let raw = match (&args.schema, &args.schema_file) {
        (Some(schema), _) => Some(schema.clone()),
        (None, Some(path)) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading schema file {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let bytes = match (args.id, raw, args.subject, args.topic) {
        (Some(id), _, _, _) => codec.encode_by_id(id, &message).await?,
        (None, Some(raw), _, Some(topic)) => {
            let definition = SchemaDefinition::new(args.schema_type, raw);
            codec
                .encode_for_topic(&topic, args.key, &definition, &message)
                .await?
        }
        (None, Some(raw), Some(subject), None) => {
            let definition = SchemaDefinition::new(args.schema_type, raw);
            codec
                .encode_by_definition(&subject, &definition, &message)
                .await?
        }
        (None, None, Some(subject), None) => codec.encode_by_subject(&subject, &message).await?,
        (None, Some(_), None, None) => bail!("--schema requires --subject or --topic"),
        (None, None, _, _) => {
            bail!("one of --id, --schema, --schema-file or --subject is required")
        }
    };
    Ok(bytes)
}
