//! Line-oriented stage storage.
//!
//! A stage directory holds one `part-NNNNN` file per reduce partition and a
//! `_SUCCESS` marker written only after every part file is synced to disk.
//! Readers refuse a directory without the marker.

use crate::error::{PipelineError, Result};
use crate::record::Record;
use rand::Rng;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Name of the part file for reduce partition `index`
pub fn part_file_name(index: usize) -> String {
    format!("part-{index:05}")
}

/// Read raw corpus lines from a file, or from every visible file of a
/// directory in name order. Names starting with `_` or `.` are hidden.
pub fn read_input(path: &Path) -> Result<Vec<String>> {
    let metadata = fs::metadata(path).map_err(|e| PipelineError::io(path, e))?;
    let files = if metadata.is_dir() {
        visible_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut lines = Vec::new();
    for file in &files {
        lines.extend(read_lines(file)?);
    }
    debug!(path = %path.display(), files = files.len(), lines = lines.len(), "Read input");
    Ok(lines)
}

/// Read and decode every record of a completed stage directory
pub fn read_stage<R: Record>(dir: &Path) -> Result<Vec<R>> {
    if !dir.join(SUCCESS_MARKER).is_file() {
        return Err(PipelineError::IncompleteStage(dir.to_path_buf()));
    }

    let mut records = Vec::new();
    for file in visible_files(dir)? {
        for line in read_lines(&file)? {
            records.push(R::decode(&line)?);
        }
    }
    Ok(records)
}

/// Write `records` into a new stage directory, one part file per partition.
/// `partition_sizes` splits `records` into consecutive runs and must sum to
/// its length.
pub fn write_stage<R: Record>(dir: &Path, records: &[R], partition_sizes: &[usize]) -> Result<()> {
    if partition_sizes.iter().sum::<usize>() != records.len() {
        return Err(PipelineError::Config(format!(
            "partition sizes do not cover {} records",
            records.len()
        )));
    }

    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut offset = 0;
    for (index, size) in partition_sizes.iter().enumerate() {
        let path = dir.join(part_file_name(index));
        write_part(&path, &records[offset..offset + size])?;
        offset += size;
    }

    let marker = dir.join(SUCCESS_MARKER);
    File::create(&marker)
        .and_then(|f| f.sync_all())
        .map_err(|e| PipelineError::io(&marker, e))?;
    debug!(dir = %dir.display(), records = records.len(), parts = partition_sizes.len(), "Stage written");
    Ok(())
}

/// Pick a fresh `<prefix>-<random>` directory name under `work_dir`
pub fn intermediate_dir(work_dir: &Path, prefix: &str) -> PathBuf {
    let mut rng = rand::rng();
    loop {
        let candidate = work_dir.join(format!("{prefix}-{}", rng.random_range(0..i32::MAX)));
        if !candidate.exists() {
            return candidate;
        }
    }
}

/// Best-effort removal of an intermediate directory
pub fn remove_stage(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "Could not remove intermediate data");
    }
}

fn write_part<R: Record>(path: &Path, records: &[R]) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        writeln!(writer, "{}", record.encode()).map_err(|e| PipelineError::io(path, e))?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| PipelineError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| PipelineError::io(path, e))
}

/// Bytes that are not valid UTF-8 become U+FFFD instead of failing the read
fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| PipelineError::io(path, e))?;
        if read == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        lines.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(lines)
}

fn visible_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('_') || name.starts_with('.') {
            continue;
        }
        if entry.path().is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
