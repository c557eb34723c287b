// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Physical file loader
//!
//! Streams top-level statements, parses the header section and registers
//! every data statement in the store with only a token-level scan: id, type,
//! raw argument span, outgoing references and guid. Attribute values are
//! materialized later, on first access.

use crate::header::apply_header_record;
use crate::lexer::{Lexer, Span, TokenKind};
use crate::materialize::{parse_arguments, scan_arguments};
use crate::source::ByteSource;
use crate::statement::{Statement, StatementReader};
use crate::store::EntityStore;
use ifc_graph_model::{EntityId, Header, LexError, ParseError, Result, SchemaRegistry};
use log::{debug, warn};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress callback receiving (phase name, percent complete)
pub type ProgressCallback = Box<dyn Fn(&str, f32) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    /// Before `ISO-10303-21;`
    Start,
    /// Between sections
    Outside,
    Header,
    Data,
    /// After `END-ISO-10303-21;`
    Finished,
}

/// Loader for ISO-10303-21 files
///
/// ```
/// use ifc_graph_parser::StepLoader;
///
/// let text = "ISO-10303-21;
/// HEADER;
/// FILE_DESCRIPTION((''),'2;1');
/// FILE_NAME('','',(''),(''),'','','');
/// FILE_SCHEMA(('IFC4'));
/// ENDSEC;
/// DATA;
/// #1=IFCCARTESIANPOINT((0.,0.,0.));
/// ENDSEC;
/// END-ISO-10303-21;
/// ";
/// let store = StepLoader::new().load_str(text).unwrap();
/// assert!(store.good());
/// assert_eq!(store.instances_by_type_name("IfcPoint", true).unwrap().len(), 1);
/// ```
pub struct StepLoader {
    registry: SchemaRegistry,
    memory_map: bool,
    interrupt: Option<Arc<AtomicBool>>,
    progress: Option<ProgressCallback>,
}

impl Default for StepLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl StepLoader {
    /// Loader resolving the built-in schemas
    pub fn new() -> Self {
        Self {
            registry: SchemaRegistry::with_builtin(),
            memory_map: false,
            interrupt: None,
            progress: None,
        }
    }

    /// Resolve `FILE_SCHEMA` identifiers against `registry`
    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Map files into memory instead of reading them range by range
    pub fn with_memory_map(mut self, enabled: bool) -> Self {
        self.memory_map = enabled;
        self
    }

    /// Stop with [`ParseError::Interrupted`] once `flag` is set
    ///
    /// The flag is checked between top-level statements.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Report (phase, percent) while loading
    pub fn with_progress(mut self, on_progress: impl Fn(&str, f32) + Send + 'static) -> Self {
        self.progress = Some(Box::new(on_progress));
        self
    }

    /// Load a file; the store keeps it open for deferred parsing
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<EntityStore> {
        let path = path.as_ref();
        debug!("loading {}", path.display());
        let source = if self.memory_map {
            ByteSource::map_path(path)?
        } else {
            ByteSource::open(path)?
        };
        self.load_source(source)
    }

    pub fn load_bytes(&self, bytes: impl Into<Arc<[u8]>>) -> Result<EntityStore> {
        self.load_source(ByteSource::from_bytes(bytes))
    }

    pub fn load_str(&self, text: &str) -> Result<EntityStore> {
        self.load_bytes(text.as_bytes())
    }

    /// Read everything from `reader` into memory, then load it
    pub fn load_reader(&self, mut reader: impl Read) -> Result<EntityStore> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.load_bytes(bytes)
    }

    /// Load from an already opened source
    ///
    /// Only I/O failures, a missing `ISO-10303-21;` preamble and interruption
    /// fail the load. Everything else is recorded in the store's error log and
    /// the offending statement is skipped.
    pub fn load_source(&self, source: ByteSource) -> Result<EntityStore> {
        debug!("reading {} bytes from {} source", source.len(), source.kind());
        self.report("Reading header", 0.0);
        let mut state = LoadState::new(self, source.len());
        {
            let mut reader = StatementReader::new(source.stream()?);
            while let Some(statement) = reader.next_statement()? {
                self.check_interrupt()?;
                state.statement(statement)?;
            }
        }
        self.report("Resolving references", 95.0);
        let store = state.finish(source);
        self.report("Done", 100.0);
        Ok(store)
    }

    fn check_interrupt(&self) -> Result<()> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                warn!("load interrupted");
                Err(ParseError::Interrupted)
            }
            _ => Ok(()),
        }
    }

    fn report(&self, phase: &str, percent: f32) {
        if let Some(on_progress) = &self.progress {
            on_progress(phase, percent);
        }
    }
}

/// Per-load bookkeeping
struct LoadState<'l> {
    loader: &'l StepLoader,
    len: u64,
    section: Section,
    header: Header,
    /// Errors seen before the store exists
    pending: Vec<(Option<EntityId>, ParseError)>,
    store: Option<EntityStore>,
    last_percent: u32,
}

impl<'l> LoadState<'l> {
    fn new(loader: &'l StepLoader, len: u64) -> Self {
        LoadState {
            loader,
            len,
            section: Section::Start,
            header: Header::default(),
            pending: Vec::new(),
            store: None,
            last_percent: 0,
        }
    }

    fn statement(&mut self, statement: Statement) -> Result<()> {
        let mut lexer = Lexer::with_base(&statement.text, statement.offset);
        let first = match lexer.expect_token() {
            Ok(token) => token,
            Err(err) => {
                self.record(None, err.into());
                return Ok(());
            }
        };

        match (self.section, first.kind) {
            (Section::Start, TokenKind::Keyword(k)) if k.eq_ignore_ascii_case("ISO-10303-21") => {
                self.section = Section::Outside;
            }
            (Section::Start, _) => {
                return Err(ParseError::format("missing ISO-10303-21 preamble"));
            }
            (Section::Outside, TokenKind::Keyword(k)) if k.eq_ignore_ascii_case("HEADER") => {
                self.section = Section::Header;
            }
            (Section::Outside, TokenKind::Keyword(k)) if k.eq_ignore_ascii_case("DATA") => {
                self.section = Section::Data;
                let store = self.store();
                debug!(
                    "header parsed, schema {}",
                    store.schema().map_or("<none>", |s| s.name())
                );
                self.loader.report("Indexing entities", 5.0);
            }
            (Section::Outside, TokenKind::Keyword(k)) if k.eq_ignore_ascii_case("END-ISO-10303-21") => {
                self.section = Section::Finished;
            }
            (Section::Header | Section::Data, TokenKind::Keyword(k)) if k.eq_ignore_ascii_case("ENDSEC") => {
                self.section = Section::Outside;
            }
            (Section::Header, TokenKind::Keyword(keyword)) => {
                // Arguments run from the keyword to the final ';'
                let end = statement.offset + statement.text.len() as u64 - 1;
                let args = lexer.slice(Span::new(first.span.end, end));
                let applied = parse_arguments(args, first.span.end)
                    .map_err(ParseError::from)
                    .and_then(|args| apply_header_record(&mut self.header, keyword, &args));
                match applied {
                    Ok(true) => {}
                    Ok(false) => debug!("skipping header record {keyword}"),
                    Err(err) => self.record(None, err),
                }
            }
            (Section::Data, TokenKind::EntityName(id)) => {
                let id = EntityId(id);
                let store = self.store();
                if let Err(err) = load_entity(store, &mut lexer, id) {
                    store.record_error(Some(id), err);
                }
                self.progress(statement.offset);
            }
            (Section::Finished, _) => {
                warn!("ignoring statement after END-ISO-10303-21 at byte {}", statement.offset);
            }
            (_, kind) => {
                self.record(
                    None,
                    LexError::new(first.span.start, format!("unexpected {kind:?} in {:?} section", self.section))
                        .into(),
                );
            }
        }
        Ok(())
    }

    fn store(&mut self) -> &mut EntityStore {
        let (header, pending, registry) = (&mut self.header, &mut self.pending, &self.loader.registry);
        self.store
            .get_or_insert_with(|| open_store(std::mem::take(header), pending, registry))
    }

    fn record(&mut self, entity: Option<EntityId>, error: ParseError) {
        match &self.store {
            Some(store) => store.record_error(entity, error),
            None => self.pending.push((entity, error)),
        }
    }

    fn progress(&mut self, offset: u64) {
        if self.len == 0 {
            return;
        }
        let percent = (offset.saturating_mul(100) / self.len) as u32;
        if percent > self.last_percent {
            self.last_percent = percent;
            // Indexing spans 5%..95%
            self.loader
                .report("Indexing entities", 5.0 + percent as f32 * 0.9);
        }
    }

    fn finish(mut self, source: ByteSource) -> EntityStore {
        if self.section != Section::Finished {
            self.record(None, ParseError::format("file ends without END-ISO-10303-21"));
        }
        let mut store = match self.store.take() {
            Some(store) => store,
            None => open_store(
                std::mem::take(&mut self.header),
                &mut self.pending,
                &self.loader.registry,
            ),
        };
        store.finish_load(source);
        store
    }
}

/// Create the store once the header is complete
fn open_store(
    header: Header,
    pending: &mut Vec<(Option<EntityId>, ParseError)>,
    registry: &SchemaRegistry,
) -> EntityStore {
    let schema = match header.schema_identifier() {
        Some(identifier) => {
            let schema = registry.resolve(identifier);
            if schema.is_none() {
                pending.push((None, ParseError::UnknownSchema(identifier.to_string())));
            }
            schema
        }
        None => {
            pending.push((None, ParseError::InvalidHeader("FILE_SCHEMA is missing".into())));
            None
        }
    };
    let mut store = EntityStore::with_parts(header, schema, None);
    store.begin_load();
    for (entity, error) in pending.drain(..) {
        store.record_error(entity, error);
    }
    store
}

/// Register one `#id=TYPE(...);` statement; the lexer sits after `#id`
fn load_entity(store: &mut EntityStore, lexer: &mut Lexer<'_>, id: EntityId) -> Result<()> {
    let equals = lexer.expect_token()?;
    if equals.kind != TokenKind::Equals {
        return Err(LexError::new(equals.span.start, format!("expected '=', found {:?}", equals.kind)).into());
    }
    let type_token = lexer.expect_token()?;
    let type_name = match type_token.kind {
        TokenKind::Keyword(name) => name,
        TokenKind::OpenParen => {
            return Err(ParseError::format(format!(
                "{id}: complex entity instances are not supported"
            )))
        }
        other => {
            return Err(LexError::new(
                type_token.span.start,
                format!("expected a type name, found {other:?}"),
            )
            .into())
        }
    };

    let declaration = store.resolve_declaration(type_name);
    if declaration.is_none() && store.schema().is_some() {
        store.record_error(Some(id), ParseError::UnknownType(type_name.to_string()));
    }
    let scan = scan_arguments(lexer, store.guid_index_of(declaration))?;
    let end = lexer.expect_token()?;
    if end.kind != TokenKind::Semicolon {
        return Err(LexError::new(end.span.start, format!("expected ';', found {:?}", end.kind)).into());
    }
    store.insert_scanned(id, type_name, declaration, scan);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NewEntity;
    use crate::store::{RemovalPolicy, StoreState};
    use ifc_graph_model::{AttributeValue, EntityResolverExt};
    use parking_lot::Mutex;
    use std::io::Write;

    const SAMPLE: &str = "ISO-10303-21;
HEADER;
FILE_DESCRIPTION(('ViewDefinition [CoordinationView]'),'2;1');
FILE_NAME('sample.ifc','2024-05-01T10:00:00',('Tester'),('Org'),'pre','app','');
FILE_SCHEMA(('IFC4'));
ENDSEC;
DATA;
/* forward reference to #2 */
#1=IFCPROJECT('0YvctVUKr0kugbFTf53O9L',$,'Project',$,$,$,$,$,#2);
#2=IFCUNITASSIGNMENT((#3));
#3=IFCSIUNIT(*,.LENGTHUNIT.,.MILLI.,.METRE.);
#10=IFCBUILDINGSTOREY('2hQBAVPOr2VPhZC9KYvb4l',$,'Level 1',$,$,$,$,$,.ELEMENT.,0.);
#20=IFCWALL('3vB2YO$MX4xv5uCqZZG05x',$,'Wall A',$,$,$,$,$,.STANDARD.);
#21=IFCWALL('1kTvXnbbzCWw8lcMd1dR4o',$,'Wall; B',$,$,$,$,$,$);
#30=IFCRELCONTAINEDINSPATIALSTRUCTURE('2Ccw4Ykrf8CRE7iVXhqE1Q',$,$,$,(#20,#21),#10);
#40=IFCRELAGGREGATES('0hLkMCNdT0AxWm0JNAnfk2',$,$,$,#1,(#10));
ENDSEC;
END-ISO-10303-21;
";

    fn with_data(data: &str) -> String {
        format!(
            "ISO-10303-21;
HEADER;
FILE_DESCRIPTION((''),'2;1');
FILE_NAME('','',(''),(''),'','','');
FILE_SCHEMA(('IFC4'));
ENDSEC;
DATA;
{data}
ENDSEC;
END-ISO-10303-21;
"
        )
    }

    #[test]
    fn test_load_indexes_without_materializing() {
        let store = StepLoader::new().load_str(SAMPLE).unwrap();
        assert!(store.good(), "{:?}", store.errors());
        assert_eq!(store.state(), StoreState::Loaded { has_errors: false });
        assert_eq!(store.len(), 8);
        assert_eq!(store.max_id(), EntityId(40));
        assert_eq!(store.header().name.name, "sample.ifc");

        // Structural indices are complete before any attribute is parsed
        assert_eq!(store.materialization_count(), 0);
        let walls = store.instances_by_type_name("IfcWall", false).unwrap();
        assert_eq!(walls, &[EntityId(20), EntityId(21)]);
        assert_eq!(store.instances_by_type_name("IfcElement", true).unwrap().len(), 2);
        assert_eq!(store.instances_by_reference(EntityId(10)), &[EntityId(30), EntityId(40)]);
        assert_eq!(store.instances_by_reference(EntityId(2)), &[EntityId(1)]);
        assert_eq!(
            store.instance_by_guid("3vB2YO$MX4xv5uCqZZG05x").unwrap().id(),
            EntityId(20)
        );
        assert_eq!(store.materialization_count(), 0);
    }

    #[test]
    fn test_materialization_is_idempotent() {
        let store = StepLoader::new().load_str(SAMPLE).unwrap();
        let first = store.attributes(EntityId(21)).unwrap();
        assert_eq!(store.materialization_count(), 1);
        let second = store.attributes(EntityId(21)).unwrap();
        assert_eq!(store.materialization_count(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first[2], AttributeValue::String("Wall; B".into()));
        assert_eq!(first.len(), 9);
        assert!(store.instance_by_id(EntityId(21)).unwrap().attributes.is_parsed());
        assert!(!store.instance_by_id(EntityId(20)).unwrap().attributes.is_parsed());
    }

    #[test]
    fn test_inverse_attributes_after_load() {
        let store = StepLoader::new().load_str(SAMPLE).unwrap();
        assert_eq!(store.inverse(EntityId(20), "ContainedInStructure").unwrap(), vec![EntityId(30)]);
        assert_eq!(store.inverse(EntityId(10), "ContainsElements").unwrap(), vec![EntityId(30)]);
        assert_eq!(store.inverse(EntityId(10), "Decomposes").unwrap(), vec![EntityId(40)]);
        assert_eq!(store.inverse(EntityId(1), "IsDecomposedBy").unwrap(), vec![EntityId(40)]);
        store.assert_consistent();
    }

    #[test]
    fn test_traverse_loaded_model() {
        let store = StepLoader::new().load_str(SAMPLE).unwrap();
        let reached: Vec<u32> = store.traverse(EntityId(40), -1).into_iter().map(|id| id.0).collect();
        assert_eq!(reached, vec![40, 1, 2, 3, 10]);
    }

    #[test]
    fn test_mutation_after_load() {
        let mut store = StepLoader::new().load_str(SAMPLE).unwrap();
        assert!(matches!(
            store.remove_entity(EntityId(20), RemovalPolicy::Restrict),
            Err(ParseError::DanglingReference { .. })
        ));
        store.remove_entity(EntityId(20), RemovalPolicy::Detach).unwrap();
        let rel = store.attributes(EntityId(30)).unwrap();
        assert_eq!(rel[4], AttributeValue::List(vec![AttributeValue::EntityRef(EntityId(21))]));
        assert!(store.instance_by_guid("3vB2YO$MX4xv5uCqZZG05x").is_none());
        assert_eq!(store.fresh_id().unwrap(), EntityId(41));
        store.assert_consistent();
    }

    #[test]
    fn test_unknown_type_is_kept_untyped() {
        let store = StepLoader::new()
            .load_str(&with_data("#1=IFCFLUXCAPACITOR(1,2);\n#2=IFCCARTESIANPOINT((0.,0.));"))
            .unwrap();
        assert!(!store.good());
        assert!(matches!(store.errors()[0], (Some(EntityId(1)), ParseError::UnknownType(_))));
        let instance = store.instance_by_id(EntityId(1)).unwrap();
        assert_eq!(instance.type_name(), "IFCFLUXCAPACITOR");
        assert!(instance.declaration().is_none());
        assert_eq!(store.attributes(EntityId(1)).unwrap().len(), 2);
        assert!(store.types().len() == 1);
    }

    #[test]
    fn test_unknown_schema_still_loads_raw() {
        let text = SAMPLE.replace("'IFC4'", "'IFC9'");
        let store = StepLoader::new().load_str(&text).unwrap();
        assert!(store.schema().is_none());
        assert!(matches!(store.errors()[0], (None, ParseError::UnknownSchema(ref s)) if s == "IFC9"));
        assert!(matches!(
            store.instances_by_type_name("IfcWall", false),
            Err(ParseError::UnknownSchema(_))
        ));
        assert_eq!(store.len(), 8);
        assert_eq!(store.traverse(EntityId(30), 1).len(), 4);
        assert!(store.exists(EntityId(20)));
    }

    #[test]
    fn test_duplicate_id_keeps_first() {
        let store = StepLoader::new()
            .load_str(&with_data(
                "#1=IFCCARTESIANPOINT((1.,1.));\n#1=IFCCARTESIANPOINT((2.,2.));",
            ))
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(matches!(store.errors()[0], (Some(EntityId(1)), ParseError::DuplicateId(EntityId(1)))));
        let coords = store.attributes(EntityId(1)).unwrap();
        assert_eq!(coords[0].as_list().unwrap()[0], AttributeValue::Float(1.0));
    }

    #[test]
    fn test_bad_statements_are_skipped() {
        let store = StepLoader::new()
            .load_str(&with_data(
                "#1=IFCCARTESIANPOINT((1.,'\\Q'));
#2=(IFCA()IFCB());
#3=IFCCARTESIANPOINT((3.,3.)) junk;
#4=IFCCARTESIANPOINT((4.,4.));
#5=IFCPOLYLOOP((#4,#99));",
            ))
            .unwrap();
        // The scan only decodes guid strings, so #1 loads and fails later
        assert!(store.contains(EntityId(1)));
        assert!(!store.contains(EntityId(2)));
        assert!(!store.contains(EntityId(3)));
        assert!(store.contains(EntityId(4)));
        let errors = store.errors();
        assert!(errors.iter().any(|(id, e)| *id == Some(EntityId(2)) && matches!(e, ParseError::InvalidFormat(_))));
        assert!(errors.iter().any(|(id, e)| *id == Some(EntityId(3)) && matches!(e, ParseError::Lex(_))));
        assert!(errors
            .iter()
            .any(|(id, e)| *id == Some(EntityId(5)) && matches!(e, ParseError::EntityNotFound(EntityId(99)))));

        assert!(matches!(store.attributes(EntityId(1)), Err(ParseError::Lex(_))));
        let before = store.errors().len();
        assert!(store.attributes(EntityId(1)).is_err());
        // Cached failure is recorded once
        assert_eq!(store.errors().len(), before);
    }

    #[test]
    fn test_schema_mismatch_on_materialization() {
        let store = StepLoader::new()
            .load_str(&with_data("#1=IFCCARTESIANPOINT((1.,1.),5);"))
            .unwrap();
        assert!(store.good());
        assert!(matches!(
            store.attributes(EntityId(1)),
            Err(ParseError::SchemaMismatch { entity: EntityId(1), .. })
        ));
        assert!(!store.good());
        assert!(store.structurally_good());
        assert_eq!(store.materialize_all(), 1);
    }

    #[test]
    fn test_duplicate_guid_at_load_keeps_both() {
        let store = StepLoader::new()
            .load_str(&with_data(
                "#1=IFCWALL('3vB2YO$MX4xv5uCqZZG05x',$,'First',$,$,$,$,$,.STANDARD.);\n\
                 #2=IFCWALL('3vB2YO$MX4xv5uCqZZG05x',$,'Second',$,$,$,$,$,.STANDARD.);",
            ))
            .unwrap();
        assert!(!store.structurally_good());
        assert!(store.errors().iter().any(|(entity, error)| {
            *entity == Some(EntityId(2))
                && matches!(error, ParseError::DuplicateGuid { existing: EntityId(1), .. })
        }));
        assert_eq!(
            store.instance_by_guid("3vB2YO$MX4xv5uCqZZG05x").map(|i| i.id()),
            Some(EntityId(1))
        );
        assert!(store.instance_by_id(EntityId(2)).is_some());
        assert_eq!(
            store.instances_by_type_name("IfcWall", false).unwrap(),
            &[EntityId(1), EntityId(2)]
        );
        store.assert_consistent();
    }

    #[test]
    fn test_failed_detach_leaves_store_unchanged() {
        let mut store = StepLoader::new()
            .load_str(&with_data(
                "#1=IFCCARTESIANPOINT((0.,0.));\n#2=IFCPOLYLOOP((#1));\n#3=IFCPOLYLOOP((#1),5);",
            ))
            .unwrap();
        assert!(matches!(
            store.remove_entity(EntityId(1), RemovalPolicy::Detach),
            Err(ParseError::SchemaMismatch { entity: EntityId(3), .. })
        ));
        assert!(store.contains(EntityId(1)));
        assert_eq!(
            store.attributes(EntityId(2)).unwrap()[0],
            AttributeValue::List(vec![AttributeValue::EntityRef(EntityId(1))])
        );
        assert_eq!(store.instances_by_reference(EntityId(1)), &[EntityId(2), EntityId(3)]);
        assert!(store.structurally_good());
    }

    #[test]
    fn test_id_space_exhaustion_is_an_error() {
        let mut store = StepLoader::new()
            .load_str(&with_data("#4294967295=IFCCARTESIANPOINT((0.,0.));"))
            .unwrap();
        assert_eq!(store.max_id(), EntityId(u32::MAX));
        let point = NewEntity::new(
            "IfcCartesianPoint",
            vec![AttributeValue::List(vec![AttributeValue::Float(1.0), AttributeValue::Float(2.0)])],
        );
        assert!(matches!(store.add_entity(point), Err(ParseError::InvalidFormat(_))));
        assert!(matches!(store.fresh_id(), Err(ParseError::InvalidFormat(_))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.max_id(), EntityId(u32::MAX));
        store.assert_consistent();
    }

    #[test]
    fn test_missing_preamble_fails() {
        let err = StepLoader::new().load_str("HEADER;\nENDSEC;\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_missing_file_schema() {
        let store = StepLoader::new()
            .load_str("ISO-10303-21;\nHEADER;\nENDSEC;\nDATA;\n#1=IFCX(1);\nENDSEC;\nEND-ISO-10303-21;\n")
            .unwrap();
        assert!(matches!(store.errors()[0], (None, ParseError::InvalidHeader(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_interrupt_flag_stops_load() {
        let flag = Arc::new(AtomicBool::new(true));
        let err = StepLoader::new()
            .with_interrupt(flag)
            .load_str(SAMPLE)
            .unwrap_err();
        assert!(matches!(err, ParseError::Interrupted));
    }

    #[test]
    fn test_progress_reports_increase() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        StepLoader::new()
            .with_progress(move |phase: &str, percent: f32| {
                sink.lock().push((phase.to_string(), percent));
            })
            .load_str(SAMPLE)
            .unwrap();
        let seen = seen.lock();
        assert_eq!(seen.first().unwrap().1, 0.0);
        assert_eq!(seen.last().unwrap(), &("Done".to_string(), 100.0));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_load_from_file_and_map() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();

        for memory_map in [false, true] {
            let store = StepLoader::new()
                .with_memory_map(memory_map)
                .load_path(file.path())
                .unwrap();
            assert!(store.good());
            let wall = store.get_or_err(EntityId(20)).unwrap();
            assert_eq!(wall.get_string(2), Some("Wall A"));
            assert_eq!(wall.get_enum(8), Some("STANDARD"));
            assert_eq!(
                store.source().unwrap().kind(),
                if memory_map { "mapped" } else { "file" }
            );
        }
    }

    #[test]
    fn test_load_reader() {
        let store = StepLoader::new().load_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(store.len(), 8);
    }
}
