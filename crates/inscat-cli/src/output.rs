use crate::error::{CliError, Result};
use inscat::core::models::sdata::SData;
use std::io;
use std::path::Path;

/// Column names: an optional `q` column, the energy bin centre, the total and
/// one column per atom and order.
fn header(sdata: &SData, with_q: bool) -> Vec<String> {
    let mut columns = Vec::with_capacity(2 + sdata.num_atoms() * sdata.order_count());
    if with_q {
        columns.push("q".to_string());
    }
    columns.push("energy".to_string());
    columns.push("total".to_string());
    for (atom, orders) in sdata.atoms() {
        for order in orders.keys() {
            columns.push(format!("atom_{atom}_order_{order}"));
        }
    }
    columns
}

/// Writes the spectra as CSV, one row per energy bin and sample point.
///
/// `q_points` labels the rows of 2-D spectra; 1-D spectra have a single sample point
/// and no `q` column. Masked bins are written as `NaN`.
pub fn write_spectra<W: io::Write>(
    writer: W,
    sdata: &SData,
    q_points: Option<&[f64]>,
) -> std::result::Result<(), csv::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(header(sdata, q_points.is_some()))?;

    let energies = sdata.frequencies();
    let total = sdata.total_spectrum();
    let spectra: Vec<_> = sdata
        .atoms()
        .flat_map(|(_, orders)| orders.values())
        .collect();

    for point in 0..sdata.sample_points() {
        for (bin, energy) in energies.iter().enumerate() {
            let mut record = Vec::with_capacity(3 + spectra.len());
            if let Some(q) = q_points {
                record.push(q.get(point).copied().unwrap_or(f64::NAN).to_string());
            }
            record.push(energy.to_string());
            let total = total.as_ref().map_or(0.0, |t| t[(point, bin)]);
            record.push(total.to_string());
            record.extend(spectra.iter().map(|s| s[(point, bin)].to_string()));
            csv.write_record(&record)?;
        }
    }
    csv.flush()?;
    Ok(())
}

pub fn write_spectra_to_path(path: &Path, sdata: &SData, q_points: Option<&[f64]>) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_spectra(io::BufWriter::new(file), sdata, q_points).map_err(|source| CliError::Output {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use inscat::core::models::sdata::{SampleForm, Spectrum};
    use inscat::core::spectra::broadening::EnergyGrid;
    use std::collections::BTreeMap;

    fn sdata(points: usize) -> SData {
        let grid = EnergyGrid::from_range(0.0, 30.0, 10.0).unwrap();
        let mut data = BTreeMap::new();
        for atom in 0..2 {
            let mut orders = BTreeMap::new();
            for order in 1..=2 {
                let value = (atom * 10 + order) as f64;
                orders.insert(order, Spectrum::from_element(points, 3, value));
            }
            data.insert(atom, orders);
        }
        SData::new(grid, 10.0, SampleForm::Powder, data).unwrap()
    }

    fn read(bytes: &[u8]) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = csv::Reader::from_reader(bytes);
        let header = reader.headers().unwrap().iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        (header, rows)
    }

    #[test]
    fn one_dimensional_spectra_have_one_row_per_bin() {
        let mut buffer = Vec::new();
        write_spectra(&mut buffer, &sdata(1), None).unwrap();
        let (header, rows) = read(&buffer);

        assert_eq!(
            header,
            [
                "energy",
                "total",
                "atom_0_order_1",
                "atom_0_order_2",
                "atom_1_order_1",
                "atom_1_order_2"
            ]
        );
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], "5");
        assert_eq!(rows[0][1], "26");
        assert_eq!(rows[2][5], "12");
    }

    #[test]
    fn two_dimensional_spectra_are_labelled_by_q() {
        let mut buffer = Vec::new();
        write_spectra(&mut buffer, &sdata(2), Some(&[0.05, 0.15])).unwrap();
        let (header, rows) = read(&buffer);
        assert_eq!(header[0], "q");
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[3][0], "0.15");
        assert_eq!(rows[3][1], "5");
    }

    #[test]
    fn path_writer_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectrum.csv");
        write_spectra_to_path(&path, &sdata(1), None).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("energy,total,"));
    }
}
