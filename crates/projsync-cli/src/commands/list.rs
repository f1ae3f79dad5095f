//! List command - show all projects

use anyhow::Result;
use projsync_client::Connection;

use crate::output::{OutputContext, ProjectRow};

pub fn list(connection: &Connection, ctx: &OutputContext) -> Result<()> {
    let rows: Vec<ProjectRow> = connection
        .list_projects()
        .iter()
        .map(ProjectRow::from)
        .collect();

    ctx.print(&rows);
    Ok(())
}
