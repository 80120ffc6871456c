#![allow(clippy::multiple_crate_versions)]
#![doc = include_str!("../../README.md")]

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::Parser;
use gpt::{Geometry, GuidPartitionTableBuilder, ImageWriter};
use log::{debug, error, info};
use types::{ImageConfig, WgptError};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(version, about = "GPT Disk Image Generation Utility")]
struct Cli {
    #[arg(short, long, help = "TOML Configuration File")]
    config: Option<PathBuf>,

    #[arg(long, help = "Logical Block Size, in bytes")]
    block_size: Option<u64>,

    #[arg(long, help = "EFI System Partition Size, in bytes")]
    esp_size: Option<u64>,

    #[arg(long, help = "Data Partition Size, in bytes")]
    data_size: Option<u64>,

    #[arg(long, help = "Padding Size, in bytes")]
    padding_size: Option<u64>,

    #[arg(long, help = "Disk GUID, randomly generated if missing")]
    disk_guid: Option<Uuid>,

    #[arg(default_value = "test.img", help = "Output Image File")]
    output: PathBuf,
}

impl Cli {
    fn image_config(&self) -> Result<ImageConfig, WgptError> {
        let mut cfg = if let Some(path) = &self.config {
            ImageConfig::from_file(path)?
        } else {
            ImageConfig::default()
        };

        if let Some(block_size) = self.block_size {
            cfg.block_size = block_size;
        }

        if let Some(esp_size) = self.esp_size {
            cfg.esp_size = esp_size;
        }

        if let Some(data_size) = self.data_size {
            cfg.data_size = data_size;
        }

        if let Some(padding_size) = self.padding_size {
            cfg.padding_size = padding_size;
        }

        Ok(cfg)
    }
}

fn write_table(
    file: &File,
    geometry: &Geometry,
    guid: Option<Uuid>,
) -> Result<Uuid, anyhow::Error> {
    file.set_len(geometry.image_size())?;

    let table = if let Some(guid) = guid {
        GuidPartitionTableBuilder::new_with_uuid(guid)
    } else {
        GuidPartitionTableBuilder::new()
    }
    .build();

    let guid = table.guid();
    debug!("Using Disk GUID {guid}");

    let mut image = ImageWriter::new(file, geometry.image_size());
    table.write(geometry, &mut image)?;

    file.sync_data()?;

    Ok(guid)
}

fn create_image(
    output: &Path,
    cfg: &ImageConfig,
    guid: Option<Uuid>,
) -> Result<Uuid, anyhow::Error> {
    let geometry = Geometry::new(cfg.total_size()?, cfg.block_size)?;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .with_context(|| format!("Couldn't open {}", output.display()))?;

    match write_table(&file, &geometry, guid) {
        Ok(guid) => Ok(guid),
        Err(e) => {
            error!("Couldn't write the image, removing {}", output.display());

            drop(file);
            if let Err(rm_err) = fs::remove_file(output) {
                error!("Couldn't remove {}: {rm_err}", output.display());
            }

            Err(e.context(format!("Couldn't write the image {}", output.display())))
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let cli = Cli::parse();

    info!(
        "Running {} {}",
        env!("CARGO_CRATE_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let cfg = cli
        .image_config()
        .context("Couldn't load the configuration")?;

    debug!("Using configuration {:#?}", cfg);

    let guid = create_image(&cli.output, &cfg, cli.disk_guid)?;

    info!(
        "Created {} with disk GUID {guid}",
        cli.output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Write as _};

    use clap::{CommandFactory as _, Parser as _};
    use gpt::GptHeader;
    use tempfile::NamedTempFile;
    use test_log::test;
    use types::ImageConfig;
    use uuid::uuid;

    use crate::{create_image, Cli};

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["wgpt"]).unwrap();

        assert_eq!(cli.output.to_str(), Some("test.img"));
        assert_eq!(cli.image_config().unwrap(), ImageConfig::default());
    }

    #[test]
    fn test_cli_overrides() {
        let mut cfg_file = NamedTempFile::new().unwrap();
        writeln!(cfg_file, "block_size = 4096").unwrap();
        writeln!(cfg_file, "esp_size = 8388608").unwrap();

        let cli = Cli::try_parse_from([
            "wgpt",
            "--config",
            cfg_file.path().to_str().unwrap(),
            "--data-size",
            "0",
            "--disk-guid",
            "3f2e1d0c-4b5a-4978-8695-a4b3c2d1e0f9",
            "disk.img",
        ])
        .unwrap();

        let cfg = cli.image_config().unwrap();
        assert_eq!(cfg.block_size, 4096);
        assert_eq!(cfg.esp_size, 8 << 20);
        assert_eq!(cfg.data_size, 0);
        assert_eq!(cfg.padding_size, 1 << 20);
        assert_eq!(
            cli.disk_guid,
            Some(uuid!("3f2e1d0c-4b5a-4978-8695-a4b3c2d1e0f9"))
        );
    }

    #[test]
    fn test_cli_invalid_guid() {
        Cli::try_parse_from(["wgpt", "--disk-guid", "not-a-guid"]).unwrap_err();
    }

    #[test]
    fn test_create_image() {
        let temp_file = NamedTempFile::new().unwrap();
        let guid = uuid!("3f2e1d0c-4b5a-4978-8695-a4b3c2d1e0f9");

        let created = create_image(temp_file.path(), &ImageConfig::default(), Some(guid)).unwrap();
        assert_eq!(created, guid);

        let data = fs::read(temp_file.path()).unwrap();
        assert_eq!(data.len(), 36_700_160);
        assert_eq!(data[510..512], [0x55, 0xaa]);

        let primary = GptHeader::from_bytes(&data[512..]).unwrap();
        assert!(primary.verify_crc32());
        assert_eq!(primary.disk_guid, guid);

        let backup = GptHeader::from_bytes(&data[(data.len() - 512)..]).unwrap();
        assert!(backup.verify_crc32());
        assert_eq!(backup.my_lba, 71_679);
    }

    #[test]
    fn test_create_image_invalid_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("invalid.img");

        let cfg = ImageConfig {
            block_size: 0,
            ..ImageConfig::default()
        };

        create_image(&output, &cfg, None).unwrap_err();
        assert!(!output.exists());
    }
}
