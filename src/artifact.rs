//! Armazenamento temporário dos artefatos de resultado.
//!
//! O [`ArtifactStore`] nomeia cada arquivo pelo id do job, grava via arquivo
//! `.partial` seguido de rename (leituras concorrentes nunca veem um arquivo
//! pela metade), serve o conteúdo e remove artefatos expirados.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};

use crate::error::LookupError;
use crate::state_machine::CarrierRecord;

const PARTIAL_EXTENSION: &str = "partial";

/// Formato do arquivo tabular produzido por job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Xlsx,
    Csv,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Xlsx => "xlsx",
            ArtifactFormat::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ArtifactFormat::Csv => "text/csv",
        }
    }

    fn writer(self) -> &'static dyn TableWriter {
        match self {
            ArtifactFormat::Xlsx => &XlsxTableWriter,
            ArtifactFormat::Csv => &CsvTableWriter,
        }
    }
}

/// Serializa o cabeçalho e as linhas de um job em bytes.
pub trait TableWriter: Send + Sync {
    fn render(&self, header: &[&str], rows: &[CarrierRecord]) -> Result<Vec<u8>, LookupError>;
}

/// Planilha Excel com uma aba e cabeçalho em negrito.
pub struct XlsxTableWriter;

// Larguras das colunas, na ordem de `CarrierRecord::HEADER`.
const COLUMN_WIDTHS: [f64; 5] = [14.0, 40.0, 18.0, 48.0, 30.0];

impl TableWriter for XlsxTableWriter {
    fn render(&self, header: &[&str], rows: &[CarrierRecord]) -> Result<Vec<u8>, LookupError> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Carriers")?;

        for (col, title) in header.iter().enumerate() {
            let col = col as u16;
            sheet.write_string_with_format(0, col, *title, &bold)?;
            if let Some(width) = COLUMN_WIDTHS.get(col as usize) {
                sheet.set_column_width(col, *width)?;
            }
        }
        for (i, record) in rows.iter().enumerate() {
            let row = (i + 1) as u32;
            for (col, value) in record.as_row().iter().enumerate() {
                sheet.write_string(row, col as u16, *value)?;
            }
        }

        Ok(workbook.save_to_buffer()?)
    }
}

/// CSV simples, útil para depuração e testes.
pub struct CsvTableWriter;

impl TableWriter for CsvTableWriter {
    fn render(&self, header: &[&str], rows: &[CarrierRecord]) -> Result<Vec<u8>, LookupError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(header)?;
        for record in rows {
            writer.write_record(record.as_row())?;
        }
        writer
            .into_inner()
            .map_err(|e| LookupError::ArtifactIo(e.into_error()))
    }
}

/// Referência a um artefato gravado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub job_id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Resultado de uma varredura de expiração.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Arquivos ou diretórios removidos.
    pub removed: usize,
    /// Entradas ainda dentro da janela de retenção.
    pub retained: usize,
    /// Entradas antigas preservadas por pertencerem a um job em andamento.
    pub protected: usize,
    /// Jobs terminados esquecidos da memória.
    pub forgotten_jobs: usize,
}

/// Diretório único onde vivem os artefatos, um arquivo por job.
pub struct ArtifactStore {
    dir: PathBuf,
    format: ArtifactFormat,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, format: ArtifactFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    /// Nome determinístico do artefato: `{job_id}.{ext}`.
    pub fn file_name(&self, job_id: &str) -> String {
        format!("{job_id}.{}", self.format.extension())
    }

    /// Grava o cabeçalho fixo seguido de uma linha por registro, na ordem recebida.
    pub async fn write(
        &self,
        job_id: &str,
        rows: &[CarrierRecord],
    ) -> Result<ArtifactRef, LookupError> {
        if !valid_job_id(job_id) {
            return Err(LookupError::Validation(format!("invalid job id: {job_id}")));
        }
        let bytes = self.format.writer().render(&CarrierRecord::HEADER, rows)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = self.file_name(job_id);
        let path = self.dir.join(&file_name);
        let partial = self.dir.join(format!("{job_id}.{PARTIAL_EXTENSION}"));
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &path).await?;

        tracing::debug!(job_id, file = %path.display(), rows = rows.len(), "artifact written");
        Ok(ArtifactRef {
            job_id: job_id.to_string(),
            file_name,
            path,
            rows: rows.len(),
        })
    }

    /// Lê o artefato de um job. Aceita o id puro ou o nome do arquivo.
    pub async fn fetch(&self, job_id: &str) -> Result<Vec<u8>, LookupError> {
        let suffix = format!(".{}", self.format.extension());
        let id = job_id.strip_suffix(&suffix).unwrap_or(job_id);
        if !valid_job_id(id) {
            return Err(LookupError::ArtifactNotFound(job_id.to_string()));
        }
        match tokio::fs::read(self.dir.join(self.file_name(id))).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(LookupError::ArtifactNotFound(job_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove arquivos ou diretórios modificados há mais de `max_age`,
    /// exceto os que pertencem a um id em `protected`.
    pub async fn sweep(
        &self,
        max_age: Duration,
        protected: &HashSet<String>,
    ) -> Result<SweepReport, LookupError> {
        let mut report = SweepReport::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };
        let now = SystemTime::now();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Removida por outra varredura no meio do caminho.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= max_age {
                report.retained += 1;
                continue;
            }

            let name = entry.file_name();
            let owner = name.to_string_lossy();
            let owner = owner.split('.').next().unwrap_or_default();
            if protected.contains(owner) {
                report.protected += 1;
                continue;
            }

            let removed = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match removed {
                Ok(()) => {
                    report.removed += 1;
                    tracing::debug!(path = %path.display(), age_secs = age.as_secs(), "artifact expired");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact"),
            }
        }
        Ok(report)
    }
}

/// Ids gerados são UUIDs; qualquer outra coisa não pode virar caminho.
fn valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
