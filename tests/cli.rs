use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($ctx:expr, $($args:expr),*) => {
        {
            let mut cmd = $ctx.command()?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

struct Workspace {
    conf_dir: TempDir,
    data_dir: TempDir,
}

impl Workspace {
    fn command(&self) -> Result<Command> {
        let mut cmd = Command::cargo_bin("imvec")?;
        for var in ["PINECONE_API_KEY", "PINECONE_INDEX", "IMVEC_BACKEND", "IMVEC_DATA_DIR", "IMVEC_PROVIDER"] {
            cmd.env_remove(var);
        }
        cmd.arg("-c")
            .arg(self.conf_dir.path())
            .args(["--backend", "memory", "--index", "cli-test", "--data-dir"])
            .arg(self.data_dir.path());
        Ok(cmd)
    }

    fn image(&self, name: &str) -> std::path::PathBuf {
        self.data_dir.path().join(name)
    }
}

fn solid(path: &Path, color: [u8; 3]) {
    RgbImage::from_pixel(32, 32, Rgb(color)).save(path).unwrap();
}

#[fixture]
fn workspace() -> Workspace {
    let ws = Workspace { conf_dir: TempDir::new().unwrap(), data_dir: TempDir::new().unwrap() };
    solid(&ws.image("red.png"), [230, 20, 20]);
    solid(&ws.image("crimson.png"), [235, 25, 15]);
    solid(&ws.image("blue.png"), [20, 30, 230]);
    ws
}

#[rstest]
fn index_then_search(workspace: Workspace) -> Result<()> {
    cargo_run!(workspace, "index")
        .success()
        .stdout(predicate::str::contains("\"upserted\": 3"));

    cargo_run!(workspace, "list", "--page-size", "2")
        .success()
        .stdout(predicate::str::contains("data/").count(2));

    cargo_run!(workspace, "search", workspace.image("red.png"), "-k", "2")
        .success()
        .stdout(predicate::str::contains("data/red.png").and(predicate::str::contains("data/blue.png").not()));

    Ok(())
}

#[rstest]
fn incremental_skips_indexed(workspace: Workspace) -> Result<()> {
    cargo_run!(workspace, "index").success();
    solid(&workspace.image("green.png"), [20, 220, 20]);

    cargo_run!(workspace, "index", "--incremental")
        .success()
        .stdout(predicate::str::contains("\"skipped\": 3").and(predicate::str::contains("\"upserted\": 1")));

    Ok(())
}

#[rstest]
fn delete_renames_and_unindexes(workspace: Workspace) -> Result<()> {
    cargo_run!(workspace, "index").success();
    cargo_run!(workspace, "delete", "data/blue.png").success();

    assert!(!workspace.image("blue.png").exists());
    assert!(workspace.image("blue.png_deleted").exists());

    cargo_run!(workspace, "search", workspace.image("red.png"))
        .success()
        .stdout(predicate::str::contains("data/blue.png").not());
    cargo_run!(workspace, "reconcile")
        .success()
        .stdout(predicate::str::is_empty());

    Ok(())
}

#[rstest]
fn reconcile_repairs_drift(workspace: Workspace) -> Result<()> {
    cargo_run!(workspace, "index").success();
    std::fs::remove_file(workspace.image("crimson.png"))?;
    solid(&workspace.image("green.png"), [20, 220, 20]);

    cargo_run!(workspace, "reconcile")
        .success()
        .stdout(predicate::str::contains("orphaned").and(predicate::str::contains("unindexed\tdata/green.png")));
    cargo_run!(workspace, "reconcile", "--apply").success();
    cargo_run!(workspace, "reconcile")
        .success()
        .stdout(predicate::str::is_empty());

    Ok(())
}

#[rstest]
fn drop_requires_confirmation(workspace: Workspace) -> Result<()> {
    cargo_run!(workspace, "index").success();
    cargo_run!(workspace, "drop").failure();
    cargo_run!(workspace, "drop", "--yes").success();
    Ok(())
}

#[test]
fn missing_settings_are_reported() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let mut cmd = Command::cargo_bin("imvec")?;
    for var in ["PINECONE_API_KEY", "PINECONE_INDEX", "IMVEC_BACKEND", "IMVEC_DATA_DIR"] {
        cmd.env_remove(var);
    }
    cmd.arg("-c")
        .arg(conf_dir.path())
        .arg("index")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--data-dir").and(predicate::str::contains("--api-key")));
    Ok(())
}
