use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Read a delimited text file into a vector of tokenized lines,
/// keeping empty fields. Tokenization is parallelized; the original
/// line order is restored afterwards.
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - field delimiter
///
pub fn read_delim_lines(input_file: &str, delim: char) -> anyhow::Result<Vec<Vec<Box<str>>>> {
    let buf_reader: Box<dyn BufRead> = open_buf_reader(input_file)?;

    let lines_raw: Vec<Box<str>> = buf_reader
        .lines()
        .map_while(Result::ok)
        .map(|x| x.into_boxed_str())
        .collect();

    // Tokenizing takes more time than reading, so split into parallel jobs
    let mut lines: Vec<(usize, Vec<Box<str>>)> = lines_raw
        .iter()
        .enumerate()
        .par_bridge()
        .map(|(i, s)| {
            let words = s
                .split(delim)
                .map(|w| w.to_owned().into_boxed_str())
                .collect();
            (i, words)
        })
        .collect();

    if lines.len() > 100_000 {
        lines.par_sort_by_key(|&(i, _)| i);
    } else {
        lines.sort_by_key(|&(i, _)| i);
    }

    Ok(lines.into_iter().map(|(_, x)| x).collect())
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    // take a look at the extension
    // return buffered reader accordingly
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    match ext {
        Some("gz") => {
            let input_file = File::open(input_file)?;
            let decoder = GzDecoder::new(input_file);
            Ok(Box::new(BufReader::new(decoder)))
        }
        _ => {
            let input_file = File::open(input_file)?;
            Ok(Box::new(BufReader::new(input_file)))
        }
    }
}

///
/// Serialize a value as JSON into `output_file` through a temporary
/// file in the same directory, renamed into place on success. A crash
/// mid-write never leaves a partially-written file visible.
///
/// * `value` - any serializable value
/// * `output_file` - destination path
///
pub fn write_json_atomic<T: serde::Serialize>(value: &T, output_file: &str) -> anyhow::Result<()> {
    let path = Path::new(output_file);
    let dir = path
        .parent()
        .ok_or(anyhow::anyhow!("no parent directory: {}", output_file))?;
    std::fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut buf = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut buf, value)?;
        buf.flush()?;
    }
    tmp.persist(path)?;
    Ok(())
}

/// Same as `write_json_atomic` but pretty-printed.
pub fn write_json_pretty_atomic<T: serde::Serialize>(
    value: &T,
    output_file: &str,
) -> anyhow::Result<()> {
    let path = Path::new(output_file);
    let dir = path
        .parent()
        .ok_or(anyhow::anyhow!("no parent directory: {}", output_file))?;
    std::fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut buf = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut buf, value)?;
        buf.flush()?;
    }
    tmp.persist(path)?;
    Ok(())
}

///
/// Create a directory if needed
/// * `dir` - directory name
///
pub fn mkdir(dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(Path::new(dir))?;
    Ok(())
}

/// Split `ntot` items into `(lb, ub)` blocks of at most `block_size`
pub fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = block_size.max(1);
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_delim_lines_keeps_empty_fields() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("x.tsv");
        std::fs::write(&path, "\tA\tB\ng1\t1\t2\ng2\t\t3\n")?;

        let lines = read_delim_lines(path.to_str().unwrap(), '\t')?;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 3);
        assert_eq!(lines[0][0].as_ref(), "");
        assert_eq!(lines[2][1].as_ref(), "");
        assert_eq!(lines[1][2].as_ref(), "2");
        Ok(())
    }

    #[test]
    fn test_write_json_atomic() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("v.json");
        let path_str = path.to_str().unwrap();

        write_json_atomic(&vec![1, 2, 3], path_str)?;
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "[1,2,3]");

        // no temporary file left behind
        let n_files = std::fs::read_dir(path.parent().unwrap())?.count();
        assert_eq!(n_files, 1);
        Ok(())
    }

    #[test]
    fn test_create_jobs() {
        assert_eq!(create_jobs(10, 3), vec![(0, 3), (3, 6), (6, 9), (9, 10)]);
        assert_eq!(create_jobs(6, 3), vec![(0, 3), (3, 6)]);
        assert_eq!(create_jobs(1, 100), vec![(0, 1)]);
        assert_eq!(create_jobs(0, 10), Vec::<(usize, usize)>::new());
    }
}
