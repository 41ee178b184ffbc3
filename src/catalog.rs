//! Program catalog loading.
//!
//! The catalog is a CSV file with one row per program:
//! `code,name,institution,university,region,specialization,hub,cutoff_2022,cutoff_2023,...`
//! Any number of `cutoff_YYYY` columns may be present. `hub` lists the
//! regions a program serves, separated by `;`.

use crate::error::{Error, Result};
use crate::models::Program;
use csv::StringRecord;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

const REQUIRED_COLUMNS: [&str; 5] = ["code", "name", "institution", "university", "region"];

struct Columns {
    code: usize,
    name: usize,
    institution: usize,
    university: usize,
    region: usize,
    specialization: Option<usize>,
    hub: Option<usize>,
    cutoffs: Vec<(u16, usize)>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let cutoff_column = Regex::new(r"^cutoff_?(\d{4})$")
            .map_err(|e| Error::Catalog(format!("invalid cutoff pattern: {}", e)))?;

        // Step 1: Locate named columns, case-insensitively
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| Error::Catalog(format!("missing column '{}'", name)))
        };

        // Step 2: Collect every cutoff_YYYY column with its year
        let mut cutoffs = Vec::new();
        for (index, header) in headers.iter().enumerate() {
            let header = header.trim().to_lowercase();
            if let Some(captures) = cutoff_column.captures(&header) {
                let year: u16 = captures[1]
                    .parse()
                    .map_err(|_| Error::Catalog(format!("invalid year in column '{}'", header)))?;
                cutoffs.push((year, index));
            }
        }
        if cutoffs.is_empty() {
            warn!("Catalog has no cutoff_YYYY columns; no program will be ranked");
        }

        // Step 3: Required columns must all be present
        Ok(Self {
            code: require(REQUIRED_COLUMNS[0])?,
            name: require(REQUIRED_COLUMNS[1])?,
            institution: require(REQUIRED_COLUMNS[2])?,
            university: require(REQUIRED_COLUMNS[3])?,
            region: require(REQUIRED_COLUMNS[4])?,
            specialization: find("specialization"),
            hub: find("hub"),
            cutoffs,
        })
    }
}

fn field(record: &StringRecord, index: usize) -> String {
    record.get(index).unwrap_or("").trim().to_string()
}

fn parse_score(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.replace(',', ".").parse::<f64>().ok()
}

fn parse_program(record: &StringRecord, columns: &Columns, line: u64) -> Result<Program> {
    let code = field(record, columns.code);
    if code.is_empty() {
        return Err(Error::Catalog(format!("line {}: empty program code", line)));
    }

    let mut cutoffs = BTreeMap::new();
    for (year, index) in &columns.cutoffs {
        let raw = field(record, *index);
        match parse_score(&raw) {
            Some(cutoff) => {
                cutoffs.insert(*year, cutoff);
            }
            None if raw.is_empty() => {}
            None => {
                return Err(Error::Catalog(format!(
                    "line {}: invalid cutoff '{}' for {}",
                    line, raw, year
                )))
            }
        }
    }

    let specialization = columns
        .specialization
        .map(|i| field(record, i))
        .filter(|s| !s.is_empty());
    let hub = columns
        .hub
        .map(|i| {
            field(record, i)
                .split(';')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Program {
        code,
        name: field(record, columns.name),
        institution: field(record, columns.institution),
        university: field(record, columns.university),
        region: field(record, columns.region),
        specialization,
        hub,
        cutoffs,
    })
}

/// Read a catalog from any CSV source. Duplicate codes are rejected.
pub fn read_catalog<R: Read>(reader: R) -> Result<Vec<Program>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| Error::Catalog(e.to_string()))?
        .clone();
    let columns = Columns::from_headers(&headers)?;

    let mut programs = Vec::new();
    let mut seen = HashSet::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| Error::Catalog(e.to_string()))?;
        let line = record.position().map(|p| p.line()).unwrap_or(index as u64 + 2);
        let program = parse_program(&record, &columns, line)?;
        if !seen.insert(program.code.to_uppercase()) {
            return Err(Error::Catalog(format!(
                "line {}: duplicate program code '{}'",
                line, program.code
            )));
        }
        programs.push(program);
    }

    debug!("Loaded {} programs", programs.len());
    Ok(programs)
}

pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<Program>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Catalog(format!("cannot open {}: {}", path.display(), e)))?;
    read_catalog(file)
}

/// Look up a program by code, ignoring case
pub fn find_program<'a>(catalog: &'a [Program], code: &str) -> Option<&'a Program> {
    catalog
        .iter()
        .find(|p| p.code.trim().eq_ignore_ascii_case(code.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
code,name,institution,university,region,specialization,hub,cutoff_2023,cutoff_2024
10101,Licence en informatique,FST,Université de Tunis El Manar,Tunis,Informatique,Tunis;Ariana;Ben Arous,131.25,\"134,5\"
20202,Génie civil,ENIS,Université de Sfax,Sfax,Génie civil,,150.1,
";

    #[test]
    fn test_reads_programs_and_cutoffs() {
        let catalog = read_catalog(SAMPLE.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);

        let info = &catalog[0];
        assert_eq!(info.code, "10101");
        assert_eq!(info.cutoff(2023), Some(131.25));
        assert_eq!(info.cutoff(2024), Some(134.5));
        assert_eq!(info.hub, vec!["Tunis", "Ariana", "Ben Arous"]);
        assert_eq!(info.specialization.as_deref(), Some("Informatique"));

        let civil = &catalog[1];
        assert!(civil.hub.is_empty());
        assert_eq!(civil.cutoff(2024), None);
        assert_eq!(civil.cutoffs.len(), 1);
    }

    #[test]
    fn test_missing_required_column() {
        let err = read_catalog("code,name\n1,x\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("institution"));
    }

    #[test]
    fn test_duplicate_codes_rejected() {
        let data = "code,name,institution,university,region,cutoff_2024\n1,a,b,c,d,100\n1,e,f,g,h,110\n";
        assert!(read_catalog(data.as_bytes()).is_err());
    }

    #[test]
    fn test_invalid_cutoff_rejected() {
        let data = "code,name,institution,university,region,cutoff_2024\n1,a,b,c,d,abc\n";
        let err = read_catalog(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("invalid cutoff"));
    }

    #[test]
    fn test_bundled_catalog_loads() {
        let catalog = read_catalog(include_str!("../data/programs.csv").as_bytes()).unwrap();
        assert_eq!(catalog.len(), 7);
        let sport = find_program(&catalog, "60610").unwrap();
        assert_eq!(sport.cutoff(2024), None);
        assert_eq!(sport.cutoff(2023), Some(101.0));
    }

    #[test]
    fn test_find_program_ignores_case() {
        let data = "code,name,institution,university,region,cutoff_2024\nAB1,a,b,c,d,100\n";
        let catalog = read_catalog(data.as_bytes()).unwrap();
        assert!(find_program(&catalog, "ab1").is_some());
        assert!(find_program(&catalog, "zz").is_none());
    }
}
