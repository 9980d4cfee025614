//! The TodoMVC scenarios and the helpers they share
//!
//! Every scenario starts in a fresh browser session already navigated to the
//! app. Step names are what shows up in the report tree.

use std::path::PathBuf;
use futures::future::BoxFuture;

use crate::error::{E2eError, E2eResult};
use crate::page::{Locator, TodoPage};
use crate::step::StepRecorder;
use crate::storage::{LocalStorageTodos, TodoItem};
use crate::visual::VisualTester;

/// Fixture titles, in insertion order
pub const TODO_ITEMS: [&str; 3] = [
    "buy some cheese",
    "feed the cat",
    "book a doctor’s appointment",
];

/// A scenario body (or suite setup) run against one session
pub type ScenarioFn = for<'a> fn(&'a ScenarioContext) -> BoxFuture<'a, E2eResult<()>>;

/// What a running scenario has to work with
pub struct ScenarioContext {
    pub page: TodoPage,
    pub steps: StepRecorder,
    screenshot_dir: PathBuf,
    slug: String,
    visual: Option<VisualTester>,
}

impl ScenarioContext {
    pub fn new(
        page: TodoPage,
        screenshot_dir: PathBuf,
        slug: impl Into<String>,
        visual: Option<VisualTester>,
    ) -> Self {
        Self {
            page,
            steps: StepRecorder::new(),
            screenshot_dir,
            slug: slug.into(),
            visual,
        }
    }

    /// Polling view over the app's persisted list
    pub fn storage(&self) -> LocalStorageTodos<'_> {
        LocalStorageTodos::new(
            &self.page,
            &self.page.selectors().storage_key,
            self.page.policy(),
        )
    }

    /// Screenshot the page, keep a copy on disk and attach it to the current step.
    /// With visual baselines enabled the screenshot must also match its baseline.
    pub async fn attach_screenshot(&self, name: &str) -> E2eResult<PathBuf> {
        let png = self.page.screenshot_png().await?;

        std::fs::create_dir_all(&self.screenshot_dir)?;
        let path = self.screenshot_dir.join(format!("{}-{}.png", self.slug, slugify(name)));
        std::fs::write(&path, &png)?;

        self.steps.attach(name, "image/png", png.clone());

        if let Some(visual) = &self.visual {
            let baseline_name = format!("{}-{}", self.slug, slugify(name));
            let diff = visual.compare_png(&baseline_name, &png)?;
            if let Some(diff_png) = diff.diff_png {
                self.steps.attach(format!("{} (diff)", name), "image/png", diff_png);
            }
            if !diff.matches {
                return Err(E2eError::ScreenshotMismatch {
                    name: baseline_name,
                    diff_percent: diff.diff_percent,
                    threshold: visual.threshold(),
                });
            }
        }

        Ok(path)
    }

    pub fn into_parts(self) -> (TodoPage, StepRecorder) {
        (self.page, self.steps)
    }
}

/// A `describe`-style group of scenarios sharing an optional setup
pub struct Suite {
    pub name: &'static str,
    pub before_each: Option<ScenarioFn>,
    pub scenarios: Vec<(&'static str, ScenarioFn)>,
}

/// One runnable scenario, flattened out of its suite
#[derive(Clone, Copy)]
pub struct Case {
    pub suite: &'static str,
    pub name: &'static str,
    pub before_each: Option<ScenarioFn>,
    pub body: ScenarioFn,
}

impl Case {
    pub fn full_name(&self) -> String {
        format!("{}: {}", self.suite, self.name)
    }

    /// File-name friendly identifier
    pub fn slug(&self) -> String {
        slugify(&self.full_name())
    }
}

impl std::fmt::Debug for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Case")
            .field("suite", &self.suite)
            .field("name", &self.name)
            .finish()
    }
}

pub fn suites() -> Vec<Suite> {
    vec![
        Suite {
            name: "New Todo",
            before_each: None,
            scenarios: vec![
                ("should allow me to add todo items", add_todo_items as ScenarioFn),
                ("should clear text input field when an item is added", clear_input_after_add as ScenarioFn),
            ],
        },
        Suite {
            name: "Mark all as completed",
            before_each: Some(with_default_todos as ScenarioFn),
            scenarios: vec![("should allow me to mark all items as completed", mark_all_completed as ScenarioFn)],
        },
        Suite {
            name: "Item",
            before_each: None,
            scenarios: vec![
                ("should allow me to mark items as complete", mark_items_complete as ScenarioFn),
                ("should allow me to edit an item", edit_item as ScenarioFn),
            ],
        },
    ]
}

/// All scenarios in declaration order
pub fn cases() -> Vec<Case> {
    suites()
        .into_iter()
        .flat_map(|suite| {
            let Suite { name, before_each, scenarios } = suite;
            scenarios.into_iter().map(move |(case_name, body)| Case {
                suite: name,
                name: case_name,
                before_each,
                body,
            })
        })
        .collect()
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// The first `completed.len()` fixture titles with the given flags
fn fixture_items(completed: &[bool]) -> Vec<TodoItem> {
    TODO_ITEMS
        .iter()
        .zip(completed)
        .map(|(title, done)| TodoItem::new(*title, *done))
        .collect()
}

async fn add_todo(input: &Locator<'_>, title: &str) -> E2eResult<()> {
    input.fill(title).await?;
    input.press_enter().await
}

/// Bring the app to exactly the three fixture items, none completed
pub async fn create_default_todos(ctx: &ScenarioContext) -> E2eResult<()> {
    ctx.steps
        .step("Create default todos", async {
            let new_todo = ctx.page.new_todo_input();
            for item in TODO_ITEMS {
                ctx.steps
                    .step(format!("Add todo: {}", item), add_todo(&new_todo, item))
                    .await?;
            }
            Ok(())
        })
        .await
}

pub async fn check_number_of_todos_in_local_storage(
    ctx: &ScenarioContext,
    expected: usize,
) -> E2eResult<()> {
    ctx.steps
        .step(
            format!("Check number of todos in local storage: {}", expected),
            ctx.storage().wait_for_count(expected),
        )
        .await
}

pub async fn check_number_of_completed_todos_in_local_storage(
    ctx: &ScenarioContext,
    expected: usize,
) -> E2eResult<()> {
    ctx.steps
        .step(
            format!("Check number of completed todos in local storage: {}", expected),
            ctx.storage().wait_for_completed_count(expected),
        )
        .await
}

pub async fn check_todos_in_local_storage(ctx: &ScenarioContext, title: &str) -> E2eResult<()> {
    ctx.steps
        .step(
            format!("Check if '{}' is in local storage", title),
            ctx.storage().wait_for_title(title),
        )
        .await
}

/// Persisted list equals `expected`, order and flags included
pub async fn check_persisted_todos(ctx: &ScenarioContext, expected: &[TodoItem]) -> E2eResult<()> {
    ctx.steps
        .step(
            format!("Check local storage holds {} todos in order", expected.len()),
            ctx.storage().wait_for_items(expected),
        )
        .await
}

fn with_default_todos(ctx: &ScenarioContext) -> BoxFuture<'_, E2eResult<()>> {
    Box::pin(async move {
        ctx.steps
            .step("Create default todos", create_default_todos(ctx))
            .await?;
        ctx.steps
            .step(
                "Verify local storage count is 3",
                check_number_of_todos_in_local_storage(ctx, 3),
            )
            .await
    })
}

fn add_todo_items(ctx: &ScenarioContext) -> BoxFuture<'_, E2eResult<()>> {
    Box::pin(async move {
        let steps = &ctx.steps;
        steps
            .step("Create a new todo locator", async {
                let new_todo = ctx.page.new_todo_input();

                steps
                    .step(
                        format!("Create first todo: {}", TODO_ITEMS[0]),
                        add_todo(&new_todo, TODO_ITEMS[0]),
                    )
                    .await?;

                steps
                    .step(
                        "Verify first todo is added",
                        ctx.page.todo_titles().expect_texts(&TODO_ITEMS[..1]),
                    )
                    .await?;

                steps
                    .step(
                        format!("Create second todo: {}", TODO_ITEMS[1]),
                        add_todo(&new_todo, TODO_ITEMS[1]),
                    )
                    .await?;

                steps
                    .step("Attach screenshot after adding todos", async {
                        ctx.attach_screenshot("Screenshot").await.map(|_| ())
                    })
                    .await?;

                steps
                    .step(
                        "Verify both todos are present",
                        ctx.page.todo_titles().expect_texts(&TODO_ITEMS[..2]),
                    )
                    .await?;

                steps
                    .step(
                        "Check number of todos in local storage",
                        check_number_of_todos_in_local_storage(ctx, 2),
                    )
                    .await?;

                let persisted = [
                    TodoItem::new(TODO_ITEMS[0], false),
                    TodoItem::new(TODO_ITEMS[1], false),
                ];
                check_persisted_todos(ctx, &persisted).await
            })
            .await
    })
}

fn clear_input_after_add(ctx: &ScenarioContext) -> BoxFuture<'_, E2eResult<()>> {
    Box::pin(async move {
        let steps = &ctx.steps;
        steps
            .step("Create a new todo locator", async {
                let new_todo = ctx.page.new_todo_input();

                steps
                    .step(
                        format!("Create todo: {}", TODO_ITEMS[0]),
                        add_todo(&new_todo, TODO_ITEMS[0]),
                    )
                    .await?;

                steps
                    .step("Verify input is cleared", new_todo.expect_empty())
                    .await?;

                steps
                    .step(
                        "Check number of todos in local storage",
                        check_number_of_todos_in_local_storage(ctx, 1),
                    )
                    .await
            })
            .await
    })
}

fn mark_all_completed(ctx: &ScenarioContext) -> BoxFuture<'_, E2eResult<()>> {
    Box::pin(async move {
        let steps = &ctx.steps;

        steps
            .step("Mark all as completed", ctx.page.mark_all_complete())
            .await?;

        steps
            .step(
                "Verify all todos have 'completed' class",
                ctx.page
                    .todo_items()
                    .expect_classes(&["completed", "completed", "completed"]),
            )
            .await?;

        steps
            .step(
                "Check completed todos in local storage",
                check_number_of_completed_todos_in_local_storage(ctx, 3),
            )
            .await
    })
}

fn mark_items_complete(ctx: &ScenarioContext) -> BoxFuture<'_, E2eResult<()>> {
    Box::pin(async move {
        let steps = &ctx.steps;
        steps
            .step("Create a new todo locator", async {
                let new_todo = ctx.page.new_todo_input();

                steps
                    .step("Create two items", async {
                        for item in &TODO_ITEMS[..2] {
                            add_todo(&new_todo, item).await?;
                        }
                        Ok(())
                    })
                    .await?;

                let items = ctx.page.todo_items();

                steps
                    .step("Mark first todo as completed", async {
                        let first = items.nth(0);
                        ctx.page.item_checkbox(&first).check().await?;
                        first.expect_class("completed").await
                    })
                    .await?;

                steps
                    .step("Verify second todo is still active", async {
                        items.nth(1).expect_not_class("completed").await?;
                        check_number_of_completed_todos_in_local_storage(ctx, 1).await?;
                        check_persisted_todos(ctx, &fixture_items(&[true, false])).await
                    })
                    .await?;

                steps
                    .step("Mark second todo as completed", async {
                        let second = items.nth(1);
                        ctx.page.item_checkbox(&second).check().await?;
                        second.expect_class("completed").await
                    })
                    .await?;

                check_number_of_completed_todos_in_local_storage(ctx, 2).await?;
                check_persisted_todos(ctx, &fixture_items(&[true, true])).await
            })
            .await
    })
}

fn edit_item(ctx: &ScenarioContext) -> BoxFuture<'_, E2eResult<()>> {
    Box::pin(async move {
        let steps = &ctx.steps;

        steps
            .step("Create default todos", create_default_todos(ctx))
            .await?;

        steps
            .step("Edit the second todo", async {
                let todo_items = ctx.page.todo_items();
                let second = todo_items.nth(1);
                let edit = ctx.page.item_edit(&second);

                second.locate(&ctx.page.selectors().todo_title).dblclick().await?;
                edit.expect_value(TODO_ITEMS[1]).await?;

                steps
                    .step("Change the text", async {
                        edit.fill("buy some sausages").await?;
                        edit.press_enter().await
                    })
                    .await?;

                steps
                    .step(
                        "Verify the updated text",
                        todo_items.expect_texts(&[TODO_ITEMS[0], "buy some sausages", TODO_ITEMS[2]]),
                    )
                    .await?;

                steps
                    .step(
                        "Check local storage",
                        check_todos_in_local_storage(ctx, "buy some sausages"),
                    )
                    .await?;

                let persisted = [
                    TodoItem::new(TODO_ITEMS[0], false),
                    TodoItem::new("buy some sausages", false),
                    TodoItem::new(TODO_ITEMS[2], false),
                ];
                check_persisted_todos(ctx, &persisted).await
            })
            .await
    })
}
