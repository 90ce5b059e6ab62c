use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::info;

use crate::db::PrototypeDb;
use crate::error::DbError;

const PDB_MAGIC: [u8; 4] = [b'P', b'D', b'B', 0];
const PDB_VERSION: u32 = 1;

/// Save serializes the database to a writer in a flat binary format:
///
/// ```text
/// [4B magic "PDB\0"] [4B version=1]
/// [8B rows] [4B dim]
/// [rows x dim x 4B float32, row-major]
/// ```
///
/// All multi-byte values are little-endian.
pub fn save(db: &PrototypeDb, w: &mut dyn Write) -> Result<(), DbError> {
    let mut bw = BufWriter::new(w);
    let write_err = |e: std::io::Error| DbError::Io(e.to_string());

    // Header.
    bw.write_all(&PDB_MAGIC).map_err(write_err)?;
    bw.write_all(&PDB_VERSION.to_le_bytes()).map_err(write_err)?;

    // Shape.
    bw.write_all(&(db.rows() as u64).to_le_bytes()).map_err(write_err)?;
    bw.write_all(&(db.dim() as u32).to_le_bytes()).map_err(write_err)?;

    for &v in db.as_slice() {
        bw.write_all(&v.to_le_bytes()).map_err(write_err)?;
    }

    bw.flush().map_err(write_err)?;
    Ok(())
}

/// Load deserializes a database written by [`save`].
///
/// The shape is validated and the stream must end right after the last
/// value. Values are restored bit for bit.
pub fn load(r: &mut dyn Read) -> Result<PrototypeDb, DbError> {
    let mut br = BufReader::new(r);
    let read_err = |e: std::io::Error| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => DbError::InvalidFormat("truncated file".into()),
        _ => DbError::Io(e.to_string()),
    };

    let mut buf4 = [0u8; 4];
    let mut buf8 = [0u8; 8];

    // Magic.
    br.read_exact(&mut buf4).map_err(read_err)?;
    if buf4 != PDB_MAGIC {
        return Err(DbError::InvalidFormat(format!("invalid magic {buf4:?}")));
    }

    // Version.
    br.read_exact(&mut buf4).map_err(read_err)?;
    let version = u32::from_le_bytes(buf4);
    if version != PDB_VERSION {
        return Err(DbError::InvalidFormat(format!(
            "unsupported version {version} (want {PDB_VERSION})"
        )));
    }

    // Shape.
    br.read_exact(&mut buf8).map_err(read_err)?;
    let rows = u64::from_le_bytes(buf8) as usize;
    br.read_exact(&mut buf4).map_err(read_err)?;
    let dim = u32::from_le_bytes(buf4) as usize;
    if rows == 0 || dim == 0 {
        return Err(DbError::InvalidFormat(format!(
            "invalid shape {rows} x {dim}"
        )));
    }
    let len = rows
        .checked_mul(dim)
        .ok_or_else(|| DbError::InvalidFormat(format!("shape {rows} x {dim} overflows")))?;

    let mut data = Vec::with_capacity(len.min(1 << 24));
    for _ in 0..len {
        br.read_exact(&mut buf4).map_err(read_err)?;
        data.push(f32::from_le_bytes(buf4));
    }

    let mut extra = [0u8; 1];
    match br.read(&mut extra) {
        Ok(0) => {}
        Ok(_) => return Err(DbError::InvalidFormat("trailing data after matrix".into())),
        Err(e) => return Err(DbError::Io(e.to_string())),
    }

    PrototypeDb::from_flat(rows, dim, data)
}

/// Writes the database to `path`, replacing any existing file.
pub fn save_file(db: &PrototypeDb, path: impl AsRef<Path>) -> Result<(), DbError> {
    let path = path.as_ref();
    let mut f = File::create(path).map_err(|e| DbError::Io(format!("{}: {e}", path.display())))?;
    save(db, &mut f)?;
    info!(
        "saved prototype database {} x {} to {}",
        db.rows(),
        db.dim(),
        path.display()
    );
    Ok(())
}

/// Reads a database from `path`.
///
/// No staleness check is made against the corpus the file was built from.
pub fn load_file(path: impl AsRef<Path>) -> Result<PrototypeDb, DbError> {
    let path = path.as_ref();
    let mut f = File::open(path).map_err(|e| DbError::Io(format!("{}: {e}", path.display())))?;
    let db = load(&mut f)?;
    info!(
        "loaded prototype database {} x {} from {}",
        db.rows(),
        db.dim(),
        path.display()
    );
    Ok(db)
}
