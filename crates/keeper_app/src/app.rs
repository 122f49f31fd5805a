use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use keeper_core::{
    export::{self, ExportFormat},
    recurrence::{self, format_month_day, URGENT_WITHIN_DAYS},
    store::{FileBackend, LoadOutcome, PendingRemoval, RecordStore},
    view::{SortOrder, TypeFilter, View, ViewEntry, ViewQuery},
    wish::{self, GeminiClient, WishGenerator, WishOutcome, DEFAULT_MODEL},
    record::DATE_FORMAT,
    Category, RecordDraft, RecordId,
};
use tracing::{debug, info};

pub const DELETE_CONFIRM_TITLE: &str = "删除确认";
pub const DELETE_CONFIRM_MESSAGE: &str = "确定要删除这条记录吗？删除后将无法恢复。";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) export_dir: PathBuf,
    pub(crate) api_key: Option<String>,
    pub(crate) wish_model: String,
    pub(crate) urgent_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`; missing or unparseable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup("KEEPER_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir.trim());
        }
        if let Some(dir) = lookup("KEEPER_EXPORT_DIR").filter(|v| !v.trim().is_empty()) {
            config.export_dir = PathBuf::from(dir.trim());
        }
        config.api_key = lookup("GEMINI_API_KEY")
            .or_else(|| lookup("API_KEY"))
            .filter(|key| !key.trim().is_empty());
        if let Some(model) = lookup("KEEPER_WISH_MODEL").filter(|v| !v.trim().is_empty()) {
            config.wish_model = model.trim().to_string();
        }
        if let Some(days) = lookup("KEEPER_URGENT_DAYS") {
            if let Ok(value) = days.trim().parse::<i64>() {
                config.urgent_days = value.max(0);
            }
        }
        config
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn wish_client(&self) -> GeminiClient {
        GeminiClient::new(self.api_key.clone()).with_model(self.wish_model.clone())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".keeper"),
            export_dir: PathBuf::from("."),
            api_key: None,
            wish_model: DEFAULT_MODEL.to_string(),
            urgent_days: URGENT_WITHIN_DAYS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormTarget {
    New,
    Editing(RecordId),
}

/// An open add/edit form.
#[derive(Clone, Debug)]
pub struct FormSession {
    target: FormTarget,
    original: RecordDraft,
    draft: RecordDraft,
    dirty: bool,
}

impl FormSession {
    pub fn draft(&self) -> &RecordDraft {
        &self.draft
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Session state behind the front end: the store plus search, filter, form
/// and delete-confirmation state. The view is rebuilt after every mutation.
pub struct KeeperController {
    store: RecordStore,
    config: AppConfig,
    query: ViewQuery,
    view: Option<View>,
    form: Option<FormSession>,
    pending_removal: Option<PendingRemoval>,
    status: String,
    today: NaiveDate,
}

impl KeeperController {
    pub fn new(config: AppConfig) -> Self {
        info!(data_dir = %config.data_dir.display(), "opening record store");
        let store = RecordStore::new(FileBackend::new(&config.data_dir));
        Self::with_store(config, store)
    }

    pub fn with_store(config: AppConfig, store: RecordStore) -> Self {
        Self {
            store,
            config,
            query: ViewQuery::default(),
            view: None,
            form: None,
            pending_removal: None,
            status: String::new(),
            today: recurrence::today(),
        }
    }

    pub fn initialize(&mut self) -> Result<()> {
        let outcome = self.store.load().context("failed to load records")?;
        match outcome {
            LoadOutcome::Loaded(count) => self.set_status(format!("已加载 {count} 条记录")),
            LoadOutcome::Seeded => self.set_status("已创建示例记录"),
            LoadOutcome::Recovered => self.set_status("数据损坏，已恢复为示例记录"),
        }
        self.refresh_view();
        Ok(())
    }

    /// Pins the reference date, e.g. for a session spanning midnight.
    pub fn set_today(&mut self, today: NaiveDate) {
        self.today = today;
        self.refresh_view();
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// `None` until records have been loaded.
    pub fn current_view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.query.search = term.into();
        self.refresh_view();
    }

    pub fn set_filter(&mut self, filter: TypeFilter) {
        self.query.filter = filter;
        self.refresh_view();
    }

    pub fn set_sort(&mut self, sort: SortOrder) {
        self.query.sort = sort;
        self.refresh_view();
    }

    pub fn form(&self) -> Option<&FormSession> {
        self.form.as_ref()
    }

    /// Opens an empty birthday form dated today.
    pub fn open_new_form(&mut self) {
        let draft = RecordDraft {
            date: self.today.format(DATE_FORMAT).to_string(),
            category: Category::Birthday,
            ..RecordDraft::default()
        };
        self.form = Some(FormSession {
            target: FormTarget::New,
            original: draft.clone(),
            draft,
            dirty: false,
        });
    }

    pub fn open_edit_form(&mut self, id: &RecordId) -> Result<()> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| anyhow!("no record with id `{id}`"))?;
        let draft = RecordDraft::from_record(&record);
        self.form = Some(FormSession {
            target: FormTarget::Editing(record.id),
            original: draft.clone(),
            draft,
            dirty: false,
        });
        Ok(())
    }

    pub fn update_form(&mut self, edit: impl FnOnce(&mut RecordDraft)) {
        let Some(session) = self.form.as_mut() else {
            self.set_status("没有打开的表单");
            return;
        };
        edit(&mut session.draft);
        session.dirty = session.draft != session.original;
    }

    pub fn cancel_form(&mut self) {
        if self.form.take().is_some() {
            debug!("form closed without saving");
        }
    }

    /// Saves the open form. On validation failure the form stays open.
    pub fn submit_form(&mut self) -> Result<RecordId> {
        let (target, draft) = match self.form.as_ref() {
            Some(session) => (session.target.clone(), session.draft.clone()),
            None => return Err(anyhow!("no open form")),
        };
        if let Err(err) = draft.validate() {
            self.set_status(format!("无法保存: {err}"));
            return Err(err.into());
        }

        let id = match target {
            FormTarget::New => {
                let snapshot = self.store.add(draft)?;
                snapshot
                    .last()
                    .map(|record| record.id.clone())
                    .ok_or_else(|| anyhow!("record missing after add"))?
            }
            FormTarget::Editing(id) => {
                self.store.update(&id, draft)?;
                id
            }
        };

        self.form = None;
        self.refresh_view();
        info!(%id, "record saved");
        self.set_status("已保存");
        Ok(id)
    }

    pub fn request_delete(&mut self, id: &RecordId) -> Result<&PendingRemoval> {
        let pending = self.store.stage_removal(id)?;
        Ok(&*self.pending_removal.insert(pending))
    }

    pub fn pending_delete(&self) -> Option<&PendingRemoval> {
        self.pending_removal.as_ref()
    }

    pub fn confirm_delete(&mut self) -> Result<()> {
        let pending = self
            .pending_removal
            .take()
            .ok_or_else(|| anyhow!("no deletion awaiting confirmation"))?;
        let title = pending.title().to_string();
        self.store.confirm_removal(pending)?;
        self.refresh_view();
        self.set_status(format!("已删除「{title}」"));
        Ok(())
    }

    pub fn cancel_delete(&mut self) {
        self.pending_removal = None;
    }

    /// Writes every record, most urgent first, into the export directory.
    pub fn export(&mut self, format: ExportFormat) -> Result<PathBuf> {
        let dir = self.config.export_dir.clone();
        self.export_to(dir, format)
    }

    pub fn export_to(&mut self, dir: impl Into<PathBuf>, format: ExportFormat) -> Result<PathBuf> {
        let view = self
            .store
            .view(&ViewQuery::default(), self.today)
            .ok_or_else(|| anyhow!("records have not been loaded"))?;
        let dir: PathBuf = dir.into();
        let path = export::write_export(&dir, format, &view, self.today)?;
        self.set_status(format!("已导出到 {}", path.display()));
        Ok(path)
    }

    pub async fn draft_wish(
        &self,
        generator: &dyn WishGenerator,
        id: &RecordId,
    ) -> Result<WishOutcome> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| anyhow!("no record with id `{id}`"))?;
        Ok(wish::draft_wish(generator, &record).await)
    }

    pub fn render(&self) -> String {
        match &self.view {
            None => "正在加载…\n".to_string(),
            Some(view) => render_view(view, self.config.urgent_days),
        }
    }

    fn refresh_view(&mut self) {
        self.view = self.store.view(&self.query, self.today);
        if let Some(view) = &self.view {
            debug!(count = view.len(), "view rebuilt");
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }
}

pub fn days_label(days_until: i64) -> String {
    if days_until == 0 {
        "今天".to_string()
    } else {
        format!("{days_until} 天")
    }
}

pub fn render_banner(view: &View) -> String {
    match view.next_up() {
        Some(entry) => format!(
            "即将到来: {} · {}",
            entry.record.title,
            days_label(entry.days_until)
        ),
        None => "即将到来: 暂无 · - 天".to_string(),
    }
}

pub fn render_card(entry: &ViewEntry, urgent_days: i64) -> String {
    let record = &entry.record;
    let marker = if recurrence::is_urgent(entry.days_until, urgent_days) {
        "!"
    } else {
        " "
    };
    let mut detail = format!(
        "{} · {}",
        format_month_day(record.date),
        record.category.label()
    );
    match record.category {
        Category::Birthday => detail.push_str(&format!(" · {}岁", entry.elapsed_years)),
        Category::Anniversary => detail.push_str(&format!(" · {}周年", entry.elapsed_years)),
        Category::Other => {}
    }

    let mut card = format!(
        "{marker} {}  [{}]  ({})\n    {detail}\n",
        record.title,
        days_label(entry.days_until),
        record.id
    );
    if let Some(notes) = record.notes() {
        card.push_str(&format!("    {notes}\n"));
    }
    card
}

pub fn render_view(view: &View, urgent_days: i64) -> String {
    let mut out = render_banner(view);
    out.push_str("\n\n");
    if view.is_empty() {
        out.push_str("还没有记录哦\n使用 `keeper add` 添加\n");
        return out;
    }
    for entry in view.iter() {
        out.push_str(&render_card(entry, urgent_days));
    }
    out
}
