use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Loads the ordered species label list, one label per line.
///
/// Line order must match the classifier's output order; blank lines are
/// skipped so the file can be formatted freely.
pub fn load_species_labels(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.trim();
        if label.is_empty() {
            continue;
        }
        labels.push(label.to_string());
    }

    if labels.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("No labels found in {:?}", filepath),
        ));
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_labels(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("species_{}.txt", uuid::Uuid::new_v4()));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_labels_in_file_order() {
        let path = write_temp_labels("Bulath_hapaya\nDankuda_pethiya\n\nDepulliya\n");

        let labels = load_species_labels(&path).unwrap();
        assert_eq!(labels, vec!["Bulath_hapaya", "Dankuda_pethiya", "Depulliya"]);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn empty_file_is_an_error() {
        let path = write_temp_labels("\n\n");

        assert!(load_species_labels(&path).is_err());

        std::fs::remove_file(path).ok();
    }
}
