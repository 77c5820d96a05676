use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{validate, CreatePipelineRequest, ErrorBody, OutputRecord, Pipeline, Run};
use reqwest::{multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{env, fs, path::Path, path::PathBuf};

/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI para crear y ejecutar pipelines en el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Crea un pipeline a partir de un JSON de configuración
    Create {
        #[arg(value_name = "NOMBRE")]
        name: String,
        #[arg(value_name = "CONFIG_JSON")]
        config: PathBuf,
    },
    /// Ejecuta un pipeline sobre un archivo .csv / .xlsx / .xls
    Run {
        #[arg(value_name = "PIPELINE_ID")]
        pipeline_id: String,
        #[arg(value_name = "ARCHIVO")]
        file: PathBuf,
        /// csv | database
        #[arg(long, default_value = "csv")]
        destination: String,
    },
    /// Consulta el estado de un run
    Status {
        #[arg(value_name = "RUN_ID")]
        run_id: String,
    },
    /// Descarga el CSV de salida de un run
    Download {
        #[arg(value_name = "RUN_ID")]
        run_id: String,
        /// Ruta local de salida (default: run_<RUN_ID>.csv)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Muestra las filas guardadas por un run con destino database
    Rows {
        #[arg(value_name = "RUN_ID")]
        run_id: String,
    },
    /// Valida un JSON de configuración localmente, sin el master
    Validate {
        #[arg(value_name = "CONFIG_JSON")]
        config: PathBuf,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Create { name, config } => {
            let configuration = read_config(&config)?;
            let url = format!("{}/api/v1/pipelines", base_url);
            let resp = client
                .post(&url)
                .json(&CreatePipelineRequest { name, configuration })
                .send()
                .await?;
            let pipeline: Pipeline = parse_response(resp).await?;

            println!("Pipeline creado:");
            println!("  id: {}", pipeline.id);
            println!("  nombre: {}", pipeline.name);
            println!("  creado: {}", pipeline.created_at);
        }

        Commands::Run {
            pipeline_id,
            file,
            destination,
        } => {
            let bytes = fs::read(&file).with_context(|| format!("leyendo {}", file.display()))?;
            let file_name = file
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("upload")
                .to_string();

            let form = multipart::Form::new()
                .part("file", multipart::Part::bytes(bytes).file_name(file_name))
                .text("destination", destination);

            let url = format!("{}/api/v1/pipelines/{}/run", base_url, pipeline_id);
            let resp = client.post(&url).multipart(form).send().await?;
            let run: Run = parse_response(resp).await?;
            print_run(&run);
        }

        Commands::Status { run_id } => {
            let url = format!("{}/api/v1/runs/{}", base_url, run_id);
            let resp = client.get(&url).send().await?;
            let run: Run = parse_response(resp).await?;
            print_run(&run);
        }

        Commands::Download { run_id, output } => {
            let url = format!("{}/api/v1/runs/{}/download", base_url, run_id);
            let resp = client.get(&url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await?;
                bail!(describe_api_error(status, &text));
            }

            let bytes = resp.bytes().await?;
            let output = output.unwrap_or_else(|| PathBuf::from(format!("run_{run_id}.csv")));
            fs::write(&output, &bytes)
                .with_context(|| format!("escribiendo {}", output.display()))?;
            println!("Salida guardada en {} ({} bytes)", output.display(), bytes.len());
        }

        Commands::Rows { run_id } => {
            let url = format!("{}/api/v1/runs/{}/rows", base_url, run_id);
            let resp = client.get(&url).send().await?;
            let records: Vec<OutputRecord> = parse_response(resp).await?;

            if records.is_empty() {
                println!("El run {run_id} no tiene filas guardadas.");
            } else {
                println!("{} filas:", records.len());
                for r in records {
                    println!("  {}", Value::Object(r.data));
                }
            }
        }

        Commands::Validate { config } => {
            let configuration = read_config(&config)?;
            let errors = validate(&configuration);
            if !errors.is_empty() {
                for e in &errors {
                    eprintln!("  {}: {}", e.field, e.message);
                }
                bail!("configuración inválida ({} errores)", errors.len());
            }
            println!("Configuración válida.");
        }
    }

    Ok(())
}

fn read_config(path: &Path) -> Result<Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("leyendo {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} no es JSON válido", path.display()))
}

/// Deserializa la respuesta o convierte el cuerpo de error del master en un error legible.
async fn parse_response<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let text = resp.text().await?;
    bail!(describe_api_error(status, &text))
}

fn describe_api_error(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) if error.details.is_null() => {
            format!("{} [{}]: {}", status, error.code, error.message)
        }
        Ok(ErrorBody { error }) => {
            format!("{} [{}]: {} {}", status, error.code, error.message, error.details)
        }
        Err(_) => format!("{}: {}", status, body),
    }
}

fn print_run(run: &Run) {
    println!("Run:");
    println!("  id: {}", run.id);
    println!("  pipeline: {}", run.pipeline_id);
    println!("  estado: {:?}", run.status);
    println!("  entrada: {}", run.input_file);
    if let Some(ref out) = run.output_file {
        println!("  salida: {}", out);
    }
    if let Some(ref msg) = run.error_message {
        println!("  error: {}", msg);
    }
    println!("  creado: {}", run.created_at);
}
