use compass_mcmc::CategoriesMatrix;

use flate2::read::GzDecoder;
use ndarray::prelude::*;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Create a directory if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    let dir = path.parent().ok_or(anyhow::anyhow!("no parent"))?;
    std::fs::create_dir_all(dir)?;
    Ok(())
}

///
/// Write every line into the output_file
///
/// * `lines` - vector of lines
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines(lines: &[Box<str>], output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

/// Header and tab-separated words of every non-empty line
fn read_tsv_words(input_file: &str) -> anyhow::Result<(Vec<Box<str>>, Vec<Vec<Box<str>>>)> {
    let buf = open_buf_reader(input_file)?;
    let mut lines = buf.lines();

    let header: Vec<Box<str>> = match lines.next() {
        Some(line) => line?.split('\t').map(|w| Box::<str>::from(w.trim())).collect(),
        None => return Err(anyhow::anyhow!("{} is empty", input_file)),
    };

    let mut rows = vec![];
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(line.split('\t').map(|w| Box::<str>::from(w.trim())).collect());
    }
    Ok((header, rows))
}

/// A numeric table with row and column names
pub struct NamedMatrix<T> {
    pub row_names: Vec<Box<str>>,
    pub col_names: Vec<Box<str>>,
    pub data: Array2<T>,
}

///
/// Read a table with a header line and row names in the first column
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_named_tsv<T>(input_file: &str) -> anyhow::Result<NamedMatrix<T>>
where
    T: std::str::FromStr + Clone,
    <T as std::str::FromStr>::Err: Display,
{
    let (header, rows) = read_tsv_words(input_file)?;
    if header.len() < 2 {
        return Err(anyhow::anyhow!(
            "{}: header needs a name column and at least one value column",
            input_file
        ));
    }
    let col_names = header[1..].to_vec();
    let ncol = col_names.len();

    let mut row_names = Vec::with_capacity(rows.len());
    let mut values = Vec::with_capacity(rows.len() * ncol);

    for (r, words) in rows.into_iter().enumerate() {
        if words.len() != ncol + 1 {
            return Err(anyhow::anyhow!(
                "{}: line {} has {} fields, expected {}",
                input_file,
                r + 2,
                words.len(),
                ncol + 1
            ));
        }
        row_names.push(words[0].clone());
        for w in &words[1..] {
            let x = w.parse::<T>().map_err(|e| {
                anyhow::anyhow!("{}: line {}: cannot parse `{}`: {}", input_file, r + 2, w, e)
            })?;
            values.push(x);
        }
    }

    let data = Array2::from_shape_vec((row_names.len(), ncol), values)?;
    Ok(NamedMatrix {
        row_names,
        col_names,
        data,
    })
}

///
/// Read an individual × category count table
///
/// * `input_file` - header `id<TAB>category...`, one row per individual
///
pub fn read_count_tsv(input_file: &str) -> anyhow::Result<NamedMatrix<i64>> {
    read_named_tsv(input_file)
}

///
/// Read a category × marker 0/1 table, residual category last
///
/// * `input_file` - header `category<TAB>marker...`
///
pub fn read_categories_tsv(input_file: &str) -> anyhow::Result<CategoriesMatrix> {
    let named = read_named_tsv::<u8>(input_file)?;
    Ok(CategoriesMatrix::new(
        named.row_names,
        named.col_names,
        named.data,
    )?)
}

///
/// Write a named table
///
/// * `output_file` - file name--either gzipped or not
/// * `corner` - header of the name column
///
pub fn write_named_tsv<T: Display>(
    output_file: &str,
    corner: &str,
    row_names: &[Box<str>],
    col_names: &[Box<str>],
    data: ArrayView2<T>,
) -> anyhow::Result<()> {
    if data.dim() != (row_names.len(), col_names.len()) {
        return Err(anyhow::anyhow!(
            "{} × {} names for a {:?} table",
            row_names.len(),
            col_names.len(),
            data.dim()
        ));
    }

    let mut lines: Vec<Box<str>> = Vec::with_capacity(row_names.len() + 1);
    let hdr = std::iter::once(corner.to_string())
        .chain(col_names.iter().map(|c| c.to_string()))
        .collect::<Vec<_>>()
        .join("\t");
    lines.push(hdr.into_boxed_str());

    for (name, row) in row_names.iter().zip(data.rows()) {
        let line = std::iter::once(name.to_string())
            .chain(row.iter().map(|x| format!("{}", x)))
            .collect::<Vec<_>>()
            .join("\t");
        lines.push(line.into_boxed_str());
    }
    write_lines(&lines, output_file)
}

pub fn write_categories_tsv(output_file: &str, categories: &CategoriesMatrix) -> anyhow::Result<()> {
    write_named_tsv(
        output_file,
        "category",
        categories.category_names(),
        categories.marker_names(),
        categories.presence().view(),
    )
}
