//! Shared fixtures: a small CellProfiler-style SQLite export and plate map
//!
//! Two images (wells C6 and D7), three cells per image. The cytoplasm table is
//! stored in a shuffled order so linking, not row position, has to pair
//! objects up.
//!
//! Features:
//! - `Cells_AreaShape_Area`: varied
//! - `Cells_Constant`: constant (removed by `variance_threshold`)
//! - `Cells_Correlation_Manders_AGP_DNA`: varied, on the default blocklist
//! - `Cytoplasm_AreaShape_Area`: exactly 2x the cell area (one of the pair is
//!   removed by `correlation_threshold`)
//! - `Cytoplasm_Intensity_MeanIntensity_DNA`, `Nuclei_AreaShape_Area`: varied

#![allow(dead_code)]

use rusqlite::{params, Connection};
use sc_features::config::PipelineConfig;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `(image, object)` of every cell, in `Per_Cells` order
pub const CELLS: [(i64, i64); 6] = [(1, 1), (1, 2), (1, 3), (2, 1), (2, 2), (2, 3)];
pub const CELL_AREA: [f64; 6] = [10.0, 20.0, 30.0, 40.0, 50.0, 65.0];
pub const NUCLEI_AREA: [f64; 6] = [5.0, 3.0, 8.0, 2.0, 7.0, 4.0];
pub const CYTO_INTENSITY: [f64; 6] = [0.3, 0.9, 0.1, 0.5, 0.2, 0.7];
pub const MANDERS: [f64; 6] = [0.5, 0.1, 0.4, 0.9, 0.2, 0.6];

/// Storage order of `Per_Cytoplasm`, as indices into [`CELLS`]
pub const CYTOPLASM_ORDER: [usize; 6] = [2, 0, 4, 1, 5, 3];

pub const WELLS: [(i64, &str); 2] = [(1, "C6"), (2, "D7")];

pub struct Fixture {
    pub dir: TempDir,
    pub sqlite: PathBuf,
    pub platemap: PathBuf,
}

impl Fixture {
    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }
}

pub fn nf1_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = dir.path().join("NF1_data.sqlite");
    create_database(&sqlite);

    let platemap = dir.path().join("platemap_NF1_CP.csv");
    std::fs::write(
        &platemap,
        "well_position,genotype,seed_density\nC6,WT,1000\nD7,NF1,1000\nE8,WT,500\n",
    )
    .unwrap();

    Fixture {
        dir,
        sqlite,
        platemap,
    }
}

fn create_database(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE Per_Image (
            ImageNumber INTEGER,
            Image_Metadata_Well TEXT,
            Image_Metadata_Plate TEXT,
            Image_Count_Cells INTEGER
        );
        CREATE TABLE Per_Cells (
            ImageNumber INTEGER,
            Cells_Number_Object_Number INTEGER,
            Cells_AreaShape_Area REAL,
            Cells_Constant REAL,
            Cells_Correlation_Manders_AGP_DNA REAL
        );
        CREATE TABLE Per_Cytoplasm (
            ImageNumber INTEGER,
            Cytoplasm_Parent_Cells INTEGER,
            Cytoplasm_Parent_OrigNuclei INTEGER,
            Cytoplasm_AreaShape_Area REAL,
            Cytoplasm_Intensity_MeanIntensity_DNA REAL
        );
        CREATE TABLE Per_Nuclei (
            ImageNumber INTEGER,
            Nuclei_Number_Object_Number INTEGER,
            Nuclei_AreaShape_Area REAL
        );",
    )
    .unwrap();

    for (image, well) in WELLS {
        conn.execute(
            "INSERT INTO Per_Image VALUES (?1, ?2, 'NF1_plate', 3)",
            params![image, well],
        )
        .unwrap();
    }
    for (i, (image, object)) in CELLS.iter().enumerate() {
        conn.execute(
            "INSERT INTO Per_Cells VALUES (?1, ?2, ?3, 1.0, ?4)",
            params![image, object, CELL_AREA[i], MANDERS[i]],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Per_Nuclei VALUES (?1, ?2, ?3)",
            params![image, object, NUCLEI_AREA[i]],
        )
        .unwrap();
    }
    for &i in &CYTOPLASM_ORDER {
        let (image, object) = CELLS[i];
        conn.execute(
            "INSERT INTO Per_Cytoplasm VALUES (?1, ?2, ?2, ?3, ?4)",
            params![image, object, 2.0 * CELL_AREA[i], CYTO_INTENSITY[i]],
        )
        .unwrap();
    }
}

pub fn config_toml(fixture: &Fixture) -> String {
    format!(
        r#"
summary_column = "Metadata_genotype"

[store]
path = "sqlite:///{sqlite}"
compartments = ["Per_Cells", "Per_Cytoplasm", "Per_Nuclei"]
strata = ["Image_Metadata_Well", "Image_Metadata_Plate"]

[store.linking.Per_Cytoplasm]
Per_Cells = "Cytoplasm_Parent_Cells"
Per_Nuclei = "Cytoplasm_Parent_OrigNuclei"

[store.linking.Per_Cells]
Per_Cytoplasm = "Cells_Number_Object_Number"

[store.linking.Per_Nuclei]
Per_Cytoplasm = "Nuclei_Number_Object_Number"

[platemap]
path = "{platemap}"
join_on = ["Metadata_well_position", "Image_Metadata_Well"]

[output]
directory = "{output}"
prefix = "nf1"
"#,
        sqlite = fixture.sqlite.display(),
        platemap = fixture.platemap.display(),
        output = fixture.output_dir().display(),
    )
}

pub fn config(fixture: &Fixture) -> PipelineConfig {
    PipelineConfig::from_toml_str(&config_toml(fixture)).unwrap()
}
