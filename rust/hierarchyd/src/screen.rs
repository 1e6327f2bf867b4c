//! One hierarchy management screen: a browse cascade plus the form bound to
//! it. Mutations go through the form controller and are followed by a reload
//! of the affected browse list.

use tracing::info;

use crate::cascade::SelectionCascade;
use crate::error::HierarchyError;
use crate::form::{EditTarget, FieldsPatch, FormBindingController, FormKind, SubmitOutcome};
use crate::gateway::{HierarchyGateway, HierarchyReader};
use crate::path::{Depth, ListKind};
use crate::projection::{project, ProjectionFilter, ViewProjection};
use crate::scope::{ScopeContext, ScopedWriter};

pub struct Screen {
    cascade: SelectionCascade,
    form: FormBindingController,
}

impl Screen {
    pub fn new(scope: ScopeContext) -> Self {
        Self {
            cascade: SelectionCascade::new(scope.clone()),
            form: FormBindingController::new(scope),
        }
    }

    pub fn cascade(&self) -> &SelectionCascade {
        &self.cascade
    }

    pub fn form(&self) -> &FormBindingController {
        &self.form
    }

    pub fn projection(&self, filter: &ProjectionFilter) -> ViewProjection {
        project(&self.cascade, filter)
    }

    pub async fn mount(&mut self, reader: &dyn HierarchyReader) {
        self.cascade.mount(reader).await;
    }

    /// Browse selection. An open create form follows the new path.
    pub async fn select(
        &mut self,
        reader: &dyn HierarchyReader,
        depth: Depth,
        id: Option<String>,
    ) -> Result<(), HierarchyError> {
        self.cascade.select(reader, depth, id).await?;
        let ticket = self.form.reseed(self.cascade.path());
        self.form.load_options(reader, ticket).await;
        Ok(())
    }

    pub async fn reload(&mut self, reader: &dyn HierarchyReader, list: ListKind) {
        self.cascade.reload(reader, list).await;
    }

    pub async fn open_create(&mut self, reader: &dyn HierarchyReader, kind: FormKind) {
        let ticket = self.form.open_create(kind, self.cascade.path());
        self.form.load_options(reader, ticket).await;
    }

    /// Opens an edit form on a record from the cached browse lists. The browse
    /// path is left alone.
    pub async fn open_edit(
        &mut self,
        reader: &dyn HierarchyReader,
        kind: FormKind,
        id: &str,
    ) -> Result<(), HierarchyError> {
        let target = match kind {
            FormKind::Department => self
                .cascade
                .find_department(id)
                .cloned()
                .map(EditTarget::Department),
            FormKind::Level => self.cascade.find_level(id).cloned().map(EditTarget::Level),
            FormKind::Class => self.cascade.find_class(id).cloned().map(EditTarget::Class),
        };
        let Some(target) = target else {
            return Err(HierarchyError::validation(
                "id",
                format!("{} {id} is not in the current view", kind.entity()),
            ));
        };
        let ticket = self.form.open_edit(target);
        self.form.load_options(reader, ticket).await;
        Ok(())
    }

    pub async fn change_ancestor(
        &mut self,
        reader: &dyn HierarchyReader,
        depth: Depth,
        id: Option<String>,
    ) -> Result<(), HierarchyError> {
        let ticket = self.form.change_ancestor(depth, id)?;
        self.form.load_options(reader, ticket).await;
        Ok(())
    }

    pub fn patch_form(&mut self, patch: FieldsPatch) -> Result<(), HierarchyError> {
        self.form.patch(patch)
    }

    pub async fn reset_form(&mut self, reader: &dyn HierarchyReader) {
        let ticket = self.form.reset();
        self.form.load_options(reader, ticket).await;
    }

    pub fn close_form(&mut self) {
        self.form.close();
    }

    pub async fn submit_form<G>(&mut self, gateway: &G) -> Result<SubmitOutcome, HierarchyError>
    where
        G: HierarchyGateway,
    {
        let outcome = self.form.submit(gateway).await?;
        self.cascade.reload(gateway, outcome.refresh).await;
        Ok(outcome)
    }

    pub async fn delete<G>(
        &mut self,
        gateway: &G,
        kind: FormKind,
        id: &str,
    ) -> Result<ListKind, HierarchyError>
    where
        G: HierarchyGateway,
    {
        let list = self.form.delete(gateway, kind, id).await?;
        self.cascade.reload(gateway, list).await;
        Ok(list)
    }

    /// Detaches students from a class, then refreshes the class counts and
    /// the roster when that class is the one on screen.
    pub async fn remove_students<G>(
        &mut self,
        gateway: &G,
        class_id: &str,
        student_ids: &[String],
    ) -> Result<usize, HierarchyError>
    where
        G: HierarchyGateway,
    {
        if student_ids.is_empty() {
            return Err(HierarchyError::validation(
                "studentIds",
                "Select at least one student.",
            ));
        }
        let removed = ScopedWriter::new(gateway, self.cascade.scope())
            .remove_students(class_id, student_ids)
            .await?;
        info!(class = %class_id, removed, "students removed from class");
        if self.cascade.path().class_id.as_deref() == Some(class_id) {
            self.cascade.reload(gateway, ListKind::Classes).await;
            self.cascade.reload(gateway, ListKind::Roster).await;
        }
        Ok(removed)
    }
}
