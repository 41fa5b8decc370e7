use nova_syntax::OUTLINE_LANGUAGE;
use nova_workspace::{
    CancellationToken, DocumentId, DocumentInfo, ProjectId, ProjectInfo, SolutionState, TextEdit,
    TextSize, Workspace, WorkspaceServices,
};
use pretty_assertions::assert_eq;

struct Fixture {
    solution: SolutionState,
    app: ProjectId,
    lib: ProjectId,
    lib_doc: DocumentId,
}

/// `app` references `lib`; `lib` has one document with a function body.
fn app_and_lib() -> Fixture {
    let app = ProjectId::new_unique();
    let lib = ProjectId::new_unique();
    let app_doc = DocumentId::new_unique(app);
    let lib_doc = DocumentId::new_unique(lib);

    let solution = SolutionState::new(WorkspaceServices::default())
        .add_project(ProjectInfo::new(lib, "lib", OUTLINE_LANGUAGE).document(
            DocumentInfo::with_text(lib_doc, "lib.outline", "class Lib { fn run() { step; } }"),
        ))
        .unwrap()
        .add_project(
            ProjectInfo::new(app, "app", OUTLINE_LANGUAGE)
                .project_reference(lib)
                .document(DocumentInfo::with_text(
                    app_doc,
                    "app.outline",
                    "fn main() { Lib.run; }",
                )),
        )
        .unwrap();

    Fixture {
        solution,
        app,
        lib,
        lib_doc,
    }
}

#[test]
fn body_edit_in_a_dependency_keeps_the_semantic_version() {
    let Fixture {
        solution,
        app,
        lib_doc,
        ..
    } = app_and_lib();
    let cancel = CancellationToken::new();
    let semantic = solution.dependent_semantic_version(app, &cancel).unwrap();
    let dependent = solution.dependent_version(app, &cancel).unwrap();

    let edited = solution
        .with_document_text(lib_doc, "class Lib { fn run() { step; step; } }")
        .unwrap();

    assert_eq!(
        edited.dependent_semantic_version(app, &cancel).unwrap(),
        semantic
    );
    assert!(edited
        .dependent_version(app, &cancel)
        .unwrap()
        .is_newer_than(dependent));
}

#[test]
fn signature_edit_in_a_dependency_moves_the_semantic_version() {
    let Fixture {
        solution,
        app,
        lib_doc,
        ..
    } = app_and_lib();
    let cancel = CancellationToken::new();
    let semantic = solution.dependent_semantic_version(app, &cancel).unwrap();

    let edited = solution
        .with_document_text(lib_doc, "class Lib { fn run(fast) { step; } }")
        .unwrap();

    assert!(edited
        .dependent_semantic_version(app, &cancel)
        .unwrap()
        .is_newer_than(semantic));
}

#[test]
fn dependents_do_not_leak_into_dependencies() {
    let Fixture {
        solution, app, lib, ..
    } = app_and_lib();
    let cancel = CancellationToken::new();
    let lib_version = solution.dependent_version(lib, &cancel).unwrap();

    let app_doc = solution.project(app).unwrap().document_ids()[0];
    let edited = solution.with_document_text(app_doc, "fn main() {}").unwrap();
    assert_eq!(edited.dependent_version(lib, &cancel).unwrap(), lib_version);
}

#[test]
fn text_edits_flow_through_the_solution() {
    let Fixture {
        solution,
        app,
        lib_doc,
        ..
    } = app_and_lib();
    let cancel = CancellationToken::new();
    let semantic = solution.dependent_semantic_version(app, &cancel).unwrap();

    // Insert inside the body of `run`.
    let offset = TextSize::from("class Lib { fn run() { step;".len() as u32);
    let edited = solution
        .with_document_text_edits(lib_doc, vec![TextEdit::insert(offset, " more;")], &cancel)
        .unwrap();

    let text = edited
        .document(lib_doc)
        .unwrap()
        .text_and_version(&cancel)
        .unwrap();
    assert_eq!(text.text.as_str(), "class Lib { fn run() { step; more; } }");
    assert_eq!(
        edited.dependent_semantic_version(app, &cancel).unwrap(),
        semantic
    );
}

#[test]
fn removing_the_middle_project_drops_its_edges() {
    let workspace = Workspace::new(WorkspaceServices::default());
    let [a, b, c] = [(); 3].map(|_| ProjectId::new_unique());

    let solution = workspace
        .update(|solution| {
            solution
                .add_project(ProjectInfo::new(c, "c", OUTLINE_LANGUAGE))?
                .add_project(ProjectInfo::new(b, "b", OUTLINE_LANGUAGE).project_reference(c))?
                .add_project(ProjectInfo::new(a, "a", OUTLINE_LANGUAGE).project_reference(b))
        })
        .unwrap();
    assert_eq!(&*solution.dependency_graph().topological_order(), &[c, b, a]);

    let solution = workspace.update(|solution| solution.remove_project(b)).unwrap();
    let graph = solution.dependency_graph();
    assert_eq!(&*graph.topological_order(), &[a, c]);
    assert!(graph.direct_dependencies(a).is_empty());
    assert!(solution.project(a).unwrap().project_references().is_empty());
    assert!(graph.is_consistent_with(&solution));
}

#[test]
fn references_must_point_at_existing_projects() {
    let solution = SolutionState::new(WorkspaceServices::default());
    let missing = ProjectId::new_unique();
    let project = ProjectId::new_unique();

    let err = solution
        .add_project(ProjectInfo::new(project, "p", OUTLINE_LANGUAGE).project_reference(missing))
        .unwrap_err();
    assert!(matches!(
        err,
        nova_workspace::WorkspaceError::ProjectReferenceNotFound { from, to }
            if from == project && to == missing
    ));
    assert!(!solution.contains_project(project));
}

#[tokio::test(flavor = "multi_thread")]
async fn async_dependent_versions_match_blocking_ones() {
    let Fixture {
        solution, app, ..
    } = app_and_lib();
    let cancel = CancellationToken::new();

    let semantic = solution
        .dependent_semantic_version_async(app, &cancel)
        .await
        .unwrap();
    let dependent = solution.dependent_version_async(app, &cancel).await.unwrap();
    assert_eq!(
        solution.dependent_semantic_version(app, &cancel).unwrap(),
        semantic
    );
    assert_eq!(solution.dependent_version(app, &cancel).unwrap(), dependent);
}
