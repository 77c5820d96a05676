use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use crate::results::OutputRecord;
use crate::run::{Run, RunId};

/* =========================
   Persistencia de runs
   ========================= */

/// Donde viven los runs y las filas de salida del destino `database`.
pub trait RunStore: Send + Sync {
    fn insert_run(&self, run: &Run) -> Result<()>;

    /// Reemplaza el run completo en una sola operación.
    /// Un run terminado ya no se puede modificar.
    fn update_run(&self, run: &Run) -> Result<()>;

    fn get_run(&self, id: &str) -> Result<Option<Run>>;

    /// Inserta todas las filas de un run de una vez. Devuelve cuántas quedaron.
    fn insert_output_records(&self, run_id: &str, rows: Vec<Map<String, Value>>) -> Result<usize>;

    fn output_records(&self, run_id: &str) -> Result<Vec<OutputRecord>>;
}

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<RunId, Run>>,
    records: Mutex<HashMap<RunId, Vec<OutputRecord>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    m.lock().map_err(|_| anyhow!("{what} lock poisoned"))
}

impl RunStore for MemoryRunStore {
    fn insert_run(&self, run: &Run) -> Result<()> {
        let mut runs = lock(&self.runs, "runs")?;
        if runs.contains_key(&run.id) {
            bail!("run {} already exists", run.id);
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn update_run(&self, run: &Run) -> Result<()> {
        let mut runs = lock(&self.runs, "runs")?;
        let current = runs
            .get_mut(&run.id)
            .ok_or_else(|| anyhow!("run {} not found", run.id))?;
        if current.status.is_terminal() {
            bail!("run {} is already {:?}", run.id, current.status);
        }
        *current = run.clone();
        Ok(())
    }

    fn get_run(&self, id: &str) -> Result<Option<Run>> {
        Ok(lock(&self.runs, "runs")?.get(id).cloned())
    }

    fn insert_output_records(&self, run_id: &str, rows: Vec<Map<String, Value>>) -> Result<usize> {
        let batch: Vec<OutputRecord> = rows
            .into_iter()
            .map(|data| OutputRecord::new(run_id, data))
            .collect();
        let n = batch.len();

        lock(&self.records, "records")?
            .entry(run_id.to_string())
            .or_default()
            .extend(batch);
        Ok(n)
    }

    fn output_records(&self, run_id: &str) -> Result<Vec<OutputRecord>> {
        Ok(lock(&self.records, "records")?
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

/* =========================
   Archivos de entrada/salida
   ========================= */

/// Almacenamiento de archivos. Las referencias devueltas son rutas relativas
/// (por ejemplo `outputs/pipeline_x_run_y.csv`) que luego acepta `read`.
pub trait FileStore: Send + Sync {
    fn save_input(&self, file_name: &str, bytes: &[u8]) -> Result<String>;
    fn save_output(&self, file_name: &str, bytes: &[u8]) -> Result<String>;
    fn read(&self, reference: &str) -> Result<Vec<u8>>;
}

pub const UPLOADS_DIR: &str = "uploads";
pub const OUTPUTS_DIR: &str = "outputs";

/// Guarda en disco bajo `root/uploads` y `root/outputs`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn save(&self, dir: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let target_dir = self.root.join(dir);
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("creando directorio {}", target_dir.display()))?;

        let name = sanitize_file_name(file_name);
        let (stem, ext) = split_name(&name);

        // si el nombre ya existe se prueba name_1, name_2, ...
        let mut n = 0u32;
        loop {
            let candidate = if n == 0 {
                name.clone()
            } else {
                format!("{stem}_{n}{ext}")
            };
            let path = target_dir.join(&candidate);

            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    f.write_all(bytes)
                        .with_context(|| format!("escribiendo {}", path.display()))?;
                    return Ok(format!("{dir}/{candidate}"));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("creando {}", path.display()));
                }
            }
        }
    }
}

impl FileStore for LocalFileStore {
    fn save_input(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        self.save(UPLOADS_DIR, file_name, bytes)
    }

    fn save_output(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        self.save(OUTPUTS_DIR, file_name, bytes)
    }

    fn read(&self, reference: &str) -> Result<Vec<u8>> {
        let rel = Path::new(reference);
        // sólo rutas relativas dentro de root
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("invalid file reference: {reference}");
        }
        let path = self.root.join(rel);
        fs::read(&path).with_context(|| format!("leyendo {}", path.display()))
    }
}

/// Se queda sólo con el último componente del nombre recibido.
fn sanitize_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("file")
        .to_string()
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}
