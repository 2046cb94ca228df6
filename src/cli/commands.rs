use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;

use crate::backend::{Backend, BackendNotice};
use crate::config::AppConfig;
use crate::model::{Item, ItemId, ItemKind};
use crate::store::SqliteStore;
use crate::view::{ViewKind, ViewProxy};

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Title of the root group
    #[arg(long, default_value = "Root")]
    pub root_title: String,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Group identifier
    pub group: ItemId,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search text, matched case-insensitively against entry titles
    #[arg(required = true)]
    pub query: Vec<String>,
    /// Only search below this group
    #[arg(long)]
    pub root: Option<ItemId>,
}

#[derive(Args, Debug, Clone)]
pub struct AddGroupArgs {
    /// Parent group identifier
    pub parent: ItemId,
    pub title: String,
}

#[derive(Args, Debug, Clone)]
pub struct AddEntryArgs {
    /// Parent group identifier
    pub parent: ItemId,
    pub title: String,
    /// Username or other secondary line
    #[arg(long, default_value = "")]
    pub subtitle: String,
}

#[derive(Args, Debug, Clone)]
pub struct RenameArgs {
    pub id: ItemId,
    pub title: String,
    /// New subtitle (kept unchanged when omitted)
    #[arg(long)]
    pub subtitle: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    pub id: ItemId,
}

pub fn init_vault(config: &AppConfig, args: &InitArgs) -> Result<()> {
    let title = args.root_title.trim();
    if title.is_empty() {
        bail!("root title cannot be empty");
    }
    let path = &config.vault.path;
    SqliteStore::create(path, &config.vault, title)
        .with_context(|| format!("initialising vault {}", path.display()))?;
    println!("Initialised vault at {}", path.display());
    Ok(())
}

/// One CLI invocation: a started backend with the configured vault loaded.
pub struct Session {
    backend: Backend,
    json: bool,
    timeout: Duration,
}

impl Session {
    pub fn open(config: &AppConfig, json: bool) -> Result<Self> {
        let store = SqliteStore::new(&config.vault);
        let backend = Backend::start(config, Box::new(store))?;
        let timeout = backend.reply_timeout();
        backend.open(&config.vault.path)?;
        loop {
            match backend.next_notice(timeout) {
                Some(BackendNotice::Opened {
                    groups, entries, ..
                }) => {
                    tracing::debug!(groups, entries, "vault ready");
                    break;
                }
                Some(BackendNotice::OpenFailed { error }) => {
                    return Err(anyhow::Error::new(error)
                        .context("opening vault (run `vaultview init` to create one)"));
                }
                Some(_) => continue,
                None => bail!("timed out waiting for the vault to open"),
            }
        }
        Ok(Self {
            backend,
            json,
            timeout,
        })
    }

    pub fn groups(&self) -> Result<()> {
        let items = self.master_groups()?;
        self.print_items(&items)
    }

    pub fn list(&self, args: ListArgs) -> Result<()> {
        let items = self.group_contents(args.group)?;
        self.print_items(&items)
    }

    pub fn search(&self, args: SearchArgs) -> Result<()> {
        let items = self.find(&args.query.join(" "), args.root)?;
        self.print_items(&items)
    }

    pub fn add_group(&self, args: AddGroupArgs) -> Result<()> {
        let item = self.add(args.parent, ItemKind::Group, &args.title, "")?;
        self.print_created(&item)
    }

    pub fn add_entry(&self, args: AddEntryArgs) -> Result<()> {
        let item = self.add(args.parent, ItemKind::Entry, &args.title, &args.subtitle)?;
        self.print_created(&item)
    }

    pub fn rename(&self, args: RenameArgs) -> Result<()> {
        self.backend.rename(args.id, &args.title, args.subtitle.as_deref())?;
        self.settle()?;
        println!("Renamed #{} to {}", args.id, args.title);
        Ok(())
    }

    pub fn delete(&self, args: DeleteArgs) -> Result<()> {
        self.backend.delete(args.id)?;
        self.settle()?;
        println!("Deleted #{}", args.id);
        Ok(())
    }

    fn master_groups(&self) -> Result<Vec<Item>> {
        let mut view = self.backend.create_view(ViewKind::MasterGroups)?;
        view.load_root()?;
        self.collect(&mut view)
    }

    fn group_contents(&self, group: ItemId) -> Result<Vec<Item>> {
        let mut view = self.backend.create_view(ViewKind::GroupList)?;
        view.load_children(group)?;
        self.collect(&mut view)
    }

    fn find(&self, text: &str, root: Option<ItemId>) -> Result<Vec<Item>> {
        if text.trim().is_empty() {
            bail!("search query cannot be empty");
        }
        let mut view = self.backend.create_view(ViewKind::SearchList)?;
        view.search(text, root)?;
        self.collect(&mut view)
    }

    fn collect(&self, view: &mut ViewProxy) -> Result<Vec<Item>> {
        let completion = view
            .wait_for_completion(self.timeout)?
            .ok_or_else(|| anyhow!("timed out waiting for the {} listing", view.kind()))?;
        tracing::debug!(token = %completion.token, count = completion.count, "listing received");
        Ok(view.state().items().to_vec())
    }

    fn add(&self, parent: ItemId, kind: ItemKind, title: &str, subtitle: &str) -> Result<Item> {
        let title = title.trim();
        if title.is_empty() {
            bail!("{kind} title cannot be empty");
        }
        self.backend.add(parent, kind, title, subtitle)?;
        loop {
            match self.backend.next_notice(self.timeout) {
                Some(BackendNotice::ItemAdded { item, .. }) => return Ok(item),
                Some(BackendNotice::MutationFailed { error }) => {
                    return Err(anyhow::Error::new(error).context(format!("adding {kind}")))
                }
                Some(_) => continue,
                None => bail!("timed out waiting for the new {kind}"),
            }
        }
    }

    /// Waits until the worker has applied the last mutation and surfaces its failure, if any.
    fn settle(&self) -> Result<()> {
        self.backend.flush()?;
        while let Some(notice) = self.backend.try_notice() {
            if let BackendNotice::MutationFailed { error } = notice {
                return Err(error.into());
            }
        }
        Ok(())
    }

    fn print_items(&self, items: &[Item]) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(items)?);
        } else {
            print!("{}", format_items(items));
        }
        Ok(())
    }

    fn print_created(&self, item: &Item) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(item)?);
        } else {
            println!("Created {} #{}  {}", item.kind, item.id, item.title);
        }
        Ok(())
    }
}

fn format_items(items: &[Item]) -> String {
    if items.is_empty() {
        return "No items.\n".to_string();
    }
    let mut out = String::new();
    for item in items {
        let marker = if item.is_group() { "/" } else { "" };
        let _ = write!(&mut out, "#{:<5} {}{marker}", item.id, item.title);
        if !item.subtitle.is_empty() {
            let _ = write!(&mut out, "  ({})", item.subtitle);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config(temp: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.vault.path = temp.path().join("vault.db");
        config
    }

    fn init_session(temp: &TempDir) -> Result<Session> {
        let config = temp_config(temp);
        init_vault(
            &config,
            &InitArgs {
                root_title: "Root".into(),
            },
        )?;
        Session::open(&config, false)
    }

    #[test]
    fn opening_a_missing_vault_points_at_init() -> Result<()> {
        let temp = TempDir::new()?;
        let err = match Session::open(&temp_config(&temp), false) {
            Ok(_) => bail!("missing vault opened"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("vaultview init"));
        Ok(())
    }

    #[test]
    fn added_items_are_listed_through_views() -> Result<()> {
        let temp = TempDir::new()?;
        let session = init_session(&temp)?;
        let root = 1;
        let email = session.add(root, ItemKind::Group, "Email", "")?;
        session.add(root, ItemKind::Group, "Bank", "")?;
        session.add(email.id, ItemKind::Entry, "Webmail", "alice")?;

        let groups: Vec<_> = session.master_groups()?.into_iter().map(|i| i.title).collect();
        assert_eq!(groups, vec!["Email", "Bank"]);
        let contents = session.group_contents(email.id)?;
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].subtitle, "alice");
        assert_eq!(session.find("WEB", None)?.len(), 1);
        Ok(())
    }

    #[test]
    fn rename_keeps_the_subtitle_unless_given() -> Result<()> {
        let temp = TempDir::new()?;
        let session = init_session(&temp)?;
        let entry = session.add(1, ItemKind::Entry, "bank", "alice")?;
        session.rename(RenameArgs {
            id: entry.id,
            title: "Bank".into(),
            subtitle: None,
        })?;

        let found = session.find("bank", None)?;
        assert_eq!(found[0].title, "Bank");
        assert_eq!(found[0].subtitle, "alice");
        Ok(())
    }

    #[test]
    fn failed_mutations_surface_as_errors() -> Result<()> {
        let temp = TempDir::new()?;
        let session = init_session(&temp)?;
        assert!(session.delete(DeleteArgs { id: 1 }).is_err());
        assert!(session.add(99, ItemKind::Entry, "orphan", "").is_err());
        assert!(session.add(1, ItemKind::Group, "   ", "").is_err());
        Ok(())
    }

    #[test]
    fn items_are_formatted_one_per_line() {
        let items = vec![
            Item::new(2, ItemKind::Group, "Email", ""),
            Item::new(3, ItemKind::Entry, "Webmail", "alice"),
        ];
        assert_eq!(
            format_items(&items),
            "#2     Email/\n#3     Webmail  (alice)\n"
        );
        assert_eq!(format_items(&[]), "No items.\n");
    }
}
