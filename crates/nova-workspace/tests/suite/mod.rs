mod dependency_graph;
mod dependent_versions;
mod file_documents;
mod retention;
