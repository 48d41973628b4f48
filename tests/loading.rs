mod common;

use aster::{
    Assembly, ConstantEntry, ErrorKind, ExportRecord, FunctionTemplate, ImportRecord,
    LoadingArguments, MultiList, RefEntry, RuntimeLoader, RuntimeType, SegmentSizes, TypeId,
    POINTER_SIZE,
};
use common::*;
use std::sync::Arc;

#[test]
fn empty_value_type() {
    init_tracing();
    let mut m = Assembly::named("M");
    m.types.push(value_type());

    let loader = RuntimeLoader::new(vec![m]);
    let t = loader.get_type(&LoadingArguments::plain("M", 0)).unwrap();
    assert_eq!(t.size, 1);
    assert_eq!(t.alignment, 1);
    assert!(t.fields.is_empty());
    assert!(t.static_pointer().is_none());
}

#[test]
fn generic_pair_layout() {
    let mut m = assembly_with_natives("M");
    let mut pair = value_type();
    pair.generic.params = SegmentSizes::fixed(2);
    pair.generic.types = vec![RefEntry::argument(0), RefEntry::argument(1)];
    pair.fields = vec![0, 1];
    m.types.push(pair); // id 2

    let loader = RuntimeLoader::new(vec![m]);
    let i32t = loader.add_native_type("M", "I32", 4, 4).unwrap();
    let i8t = loader.add_native_type("M", "I8", 1, 1).unwrap();

    let pair = loader.get_type(&request("M", 2, &[&i32t, &i8t])).unwrap();
    assert_eq!(pair.size, 8);
    assert_eq!(pair.alignment, 4);
    assert_eq!(pair.fields.len(), 2);
    assert_eq!((pair.fields[0].offset, pair.fields[0].length), (0, 4));
    assert_eq!((pair.fields[1].offset, pair.fields[1].length), (4, 1));
    assert_eq!(pair.fields[0].ty, i32t.id);
    assert_eq!(pair.fields[1].ty, i8t.id);
}

#[test]
fn reference_cycle_loads() {
    let mut m = Assembly::named("M");
    let mut node = reference_type();
    node.generic.types = vec![RefEntry::assembly(0), RefEntry::list_end()];
    node.fields = vec![0];
    m.types.push(node);

    let loader = RuntimeLoader::new(vec![m]);
    let t = loader.get_type(&LoadingArguments::plain("M", 0)).unwrap();
    assert_eq!(t.fields.len(), 1);
    assert_eq!(t.fields[0].ty, t.id);
    assert_eq!(t.fields[0].offset, 0);
    assert_eq!(t.fields[0].length, POINTER_SIZE);
    assert_eq!(t.size, POINTER_SIZE);
}

#[test]
fn value_cycle_is_rejected() {
    let mut m = Assembly::named("M");
    let mut node = value_type();
    node.generic.types = vec![RefEntry::assembly(0), RefEntry::list_end()];
    node.fields = vec![0];
    m.types.push(node);

    let loader = RuntimeLoader::new(vec![m]);
    let err = loader
        .get_type(&LoadingArguments::plain("M", 0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Circular);
    // All-or-nothing: nothing was published and no id became valid.
    assert_eq!(loader.loaded_type_count(), 0);
    assert!(loader.get_type_by_id(TypeId::new(1)).is_none());
}

#[test]
fn mutual_value_cycle_is_rejected_through_intermediate() {
    // A contains B by value, B contains A by value.
    let mut m = Assembly::named("M");
    let mut a = value_type();
    a.generic.types = vec![RefEntry::assembly(1), RefEntry::list_end()];
    a.fields = vec![0];
    m.types.push(a);
    let mut b = value_type();
    b.generic.types = vec![RefEntry::assembly(0), RefEntry::list_end()];
    b.fields = vec![0];
    m.types.push(b);

    let loader = RuntimeLoader::new(vec![m]);
    let err = loader
        .get_type(&LoadingArguments::plain("M", 0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Circular);
}

#[test]
fn reference_breaks_value_cycle() {
    // A contains B by value, B refers back to A through a reference
    // type; the cycle passes through reference storage and loads.
    let mut m = Assembly::named("M");
    let mut a = value_type();
    a.generic.types = vec![RefEntry::assembly(1), RefEntry::list_end()];
    a.fields = vec![0];
    m.types.push(a);
    let mut b = reference_type();
    b.generic.types = vec![RefEntry::assembly(0), RefEntry::list_end()];
    b.fields = vec![0];
    m.types.push(b);

    let loader = RuntimeLoader::new(vec![m]);
    let a = loader.get_type(&LoadingArguments::plain("M", 0)).unwrap();
    assert_eq!(a.size, POINTER_SIZE);
    let b = loader.get_type_by_id(a.fields[0].ty).unwrap();
    assert_eq!(b.fields[0].ty, a.id);
}

#[test]
fn get_type_is_idempotent() {
    let mut m = Assembly::named("M");
    m.types.push(value_type());

    let loader = RuntimeLoader::new(vec![m]);
    let first = loader.get_type(&LoadingArguments::plain("M", 0)).unwrap();
    let second = loader.get_type(&LoadingArguments::plain("M", 0)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(loader.loaded_type_count(), 1);
}

#[test]
fn failed_request_leaves_no_id_gap() {
    let mut m = Assembly::named("M");
    m.types.push(value_type()); // id 0: fine
    let mut broken = value_type();
    broken.fields = vec![7]; // field index outside the RefList
    m.types.push(broken); // id 1

    let loader = RuntimeLoader::new(vec![m]);
    let err = loader
        .get_type(&LoadingArguments::plain("M", 1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Program);

    // The next successful load still gets the first id.
    let ok = loader.get_type(&LoadingArguments::plain("M", 0)).unwrap();
    assert_eq!(ok.id, TypeId::new(1));
}

#[test]
fn clone_chain_and_clone_cycle() {
    let mut m = assembly_with_natives("M");
    let mut holder = value_type();
    holder.generic.types = vec![RefEntry::clone_of(1), RefEntry::assembly(0), RefEntry::list_end()];
    holder.fields = vec![0];
    m.types.push(holder); // id 2

    let mut cyclic = value_type();
    cyclic.generic.types = vec![RefEntry::clone_of(1), RefEntry::clone_of(0)];
    cyclic.fields = vec![0];
    m.types.push(cyclic); // id 3

    let loader = RuntimeLoader::new(vec![m]);
    loader.add_native_type("M", "I32", 4, 4).unwrap();

    let ok = loader.get_type(&LoadingArguments::plain("M", 2)).unwrap();
    assert_eq!(ok.size, 4);

    let err = loader
        .get_type(&LoadingArguments::plain("M", 3))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Program);
}

#[test]
fn import_resolves_through_reexport() {
    let mut a = Assembly::named("A");
    a.types.push(value_type());
    a.export_types.push(ExportRecord::new("A.Unit", 0));

    let mut b = Assembly::named("B");
    b.import_types.push(ImportRecord::new("A", "A.Unit"));
    b.export_types.push(ExportRecord::new("B.Unit", 0));

    let mut c = Assembly::named("C");
    c.import_types
        .push(ImportRecord::new("B", "B.Unit").with_arity(0));
    let mut holder = value_type();
    holder.generic.types = vec![RefEntry::import(0), RefEntry::list_end()];
    holder.fields = vec![0];
    c.types.push(holder);

    let loader = RuntimeLoader::new(vec![a, b, c]);
    let t = loader.get_type(&LoadingArguments::plain("C", 0)).unwrap();
    assert_eq!(t.fields.len(), 1);

    let resolved = loader.get_type_by_id(t.fields[0].ty).unwrap();
    assert_eq!(resolved.args.assembly, "A");
    assert_eq!(resolved.args.id, 0);
    assert_eq!(loader.find_export_type("C", "anything"), None);
    assert_eq!(
        loader.find_export_type("B", "B.Unit"),
        Some(("A".to_string(), 0))
    );
}

#[test]
fn import_arity_mismatch_is_a_link_error() {
    let mut a = Assembly::named("A");
    let mut pair = value_type();
    pair.generic.params = SegmentSizes::fixed(2);
    a.types.push(pair);
    a.export_types.push(ExportRecord::new("A.Pair", 0));

    let mut b = Assembly::named("B");
    b.import_types
        .push(ImportRecord::new("A", "A.Pair").with_arity(1));
    let mut holder = value_type();
    holder.generic.types = vec![
        RefEntry::import(0),
        RefEntry::assembly(1),
        RefEntry::list_end(),
        RefEntry::list_end(),
    ];
    holder.fields = vec![0];
    b.types.push(holder); // id 0
    b.types.push(value_type()); // id 1

    let loader = RuntimeLoader::new(vec![a, b]);
    let err = loader
        .get_type(&LoadingArguments::plain("B", 0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Link);
}

#[test]
fn pointer_back_reference() {
    let mut core = Assembly::named("Core");
    let mut pointer = value_type();
    pointer.generic.params = SegmentSizes::fixed(1);
    core.types.push(pointer);
    core.export_types.push(ExportRecord::new("Core.Pointer", 0));

    let m = assembly_with_natives("M");
    let loader = RuntimeLoader::new(vec![core, m]);
    let i32t = loader.add_native_type("M", "I32", 4, 4).unwrap();

    let ptr = loader.load_pointer_type(&i32t).unwrap();
    assert!(loader.is_pointer_type(&ptr));
    assert!(!loader.is_pointer_type(&i32t));
    assert_eq!(i32t.pointer_type(), Some(ptr.id));

    let again = loader.load_pointer_type(&i32t).unwrap();
    assert!(Arc::ptr_eq(&ptr, &again));
}

#[test]
fn box_type_wraps_value_types() {
    let mut core = Assembly::named("Core");
    let mut boxed = reference_type();
    boxed.generic.params = SegmentSizes::fixed(1);
    boxed.generic.types = vec![RefEntry::argument(0)];
    boxed.fields = vec![0];
    core.types.push(boxed);
    core.export_types.push(ExportRecord::new("Core.Box", 0));

    let m = assembly_with_natives("M");
    let loader = RuntimeLoader::new(vec![core, m]);
    let i32t = loader.add_native_type("M", "I32", 4, 4).unwrap();

    let boxed = loader.load_box_type(&i32t).unwrap();
    assert_eq!(boxed.storage, aster::StorageMode::Reference);
    assert_eq!(boxed.fields[0].ty, i32t.id);
    assert_eq!(boxed.size, 4);

    let again = loader.load_box_type(&i32t).unwrap();
    assert!(Arc::ptr_eq(&boxed, &again));
}

#[test]
fn missing_pointer_template_fails_on_first_use() {
    let m = assembly_with_natives("M");
    let loader = RuntimeLoader::new(vec![m]);
    let i32t = loader.add_native_type("M", "I32", 4, 4).unwrap();
    let err = loader.load_pointer_type(&i32t).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Link);
}

#[test]
fn global_storage_gets_aligned_statics() {
    let mut m = assembly_with_natives("M");
    let mut counters = global_type();
    counters.generic.types = vec![RefEntry::assembly(0), RefEntry::list_end()];
    counters.fields = vec![0];
    m.types.push(counters); // id 2

    let loader = RuntimeLoader::new(vec![m]);
    loader.add_native_type("M", "I32", 4, 4).unwrap();
    let t = loader.get_type(&LoadingArguments::plain("M", 2)).unwrap();
    assert_eq!(t.size, 4);
    let ptr = t.static_pointer().expect("global storage must exist");
    assert_eq!(ptr as usize % t.alignment, 0);
}

#[test]
fn initializer_and_finalizer_signatures() {
    let mut m = Assembly::named("M");

    // Function 0: () -> (), used as the initializer.
    let mut init = FunctionTemplate::default();
    init.generic.types = vec![RefEntry::empty()];
    init.return_type = 0;
    init.instructions = vec![0x01];
    m.functions.push(init);

    // Function 1: (Node) -> (), used as the finalizer.
    let mut fin = FunctionTemplate::default();
    fin.generic.types = vec![
        RefEntry::assembly(1),
        RefEntry::list_end(),
        RefEntry::empty(),
    ];
    fin.return_type = 2;
    fin.parameters = vec![0];
    fin.instructions = vec![0x02];
    m.functions.push(fin);

    // Type 0: global storage with the initializer.
    let mut globals = global_type();
    globals.generic.functions = vec![RefEntry::assembly(0), RefEntry::list_end()];
    globals.initializer = Some(0);
    m.types.push(globals);

    // Type 1: reference storage with the finalizer.
    let mut node = reference_type();
    node.generic.functions = vec![RefEntry::assembly(1), RefEntry::list_end()];
    node.finalizer = Some(0);
    m.types.push(node);

    // Type 2: value storage incorrectly claiming a finalizer.
    let mut broken = value_type();
    broken.generic.functions = vec![RefEntry::assembly(1), RefEntry::list_end()];
    broken.finalizer = Some(0);
    m.types.push(broken);

    let loader = RuntimeLoader::new(vec![m]);

    let globals = loader.get_type(&LoadingArguments::plain("M", 0)).unwrap();
    assert!(globals.initializer.is_some());
    assert!(globals.finalizer.is_none());

    let node = loader.get_type(&LoadingArguments::plain("M", 1)).unwrap();
    let finalizer = loader
        .get_function_by_id(node.finalizer.expect("finalizer"))
        .unwrap();
    assert_eq!(finalizer.parameters, vec![Some(node.id)]);
    assert_eq!(finalizer.return_type, None);

    let err = loader
        .get_type(&LoadingArguments::plain("M", 2))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Program);
}

#[test]
fn function_loading_resolves_signature() {
    let mut m = assembly_with_natives("M");
    // Function 0: (I32, I8) -> I32.
    let mut f = FunctionTemplate::default();
    f.generic.types = vec![
        RefEntry::assembly(0),
        RefEntry::list_end(),
        RefEntry::assembly(1),
        RefEntry::list_end(),
    ];
    f.return_type = 0;
    f.parameters = vec![0, 2];
    f.instructions = vec![0x10, 0x20];
    m.functions.push(f);

    let loader = RuntimeLoader::new(vec![m]);
    let i32t = loader.add_native_type("M", "I32", 4, 4).unwrap();
    let i8t = loader.add_native_type("M", "I8", 1, 1).unwrap();

    let f = loader.get_function(&LoadingArguments::plain("M", 0)).unwrap();
    assert_eq!(f.return_type, Some(i32t.id));
    assert_eq!(f.parameters, vec![Some(i32t.id), Some(i8t.id)]);
    let again = loader.get_function(&LoadingArguments::plain("M", 0)).unwrap();
    assert!(Arc::ptr_eq(&f, &again));
}

#[test]
fn code_blobs_are_padded_and_shared() {
    let mut m = assembly_with_natives("M");
    let mut f = FunctionTemplate::default();
    f.generic.params = SegmentSizes::fixed(1);
    f.generic.types = vec![RefEntry::empty(), RefEntry::argument(0)];
    f.return_type = 0;
    f.instructions = vec![0xAA, 0xBB];
    m.functions.push(f);

    let loader = RuntimeLoader::new(vec![m]);
    let i32t = loader.add_native_type("M", "I32", 4, 4).unwrap();
    let i8t = loader.add_native_type("M", "I8", 1, 1).unwrap();

    let for_i32 = loader
        .get_function(&LoadingArguments::new("M", 0, args_of(&[&i32t])))
        .unwrap();
    let code = for_i32.code.as_ref().expect("code blob");
    assert_eq!(code.instructions.len(), 2 + 16);
    assert_eq!(&code.instructions[..2], &[0xAA, 0xBB]);
    assert!(code.instructions[2..].iter().all(|&b| b == 0x00));

    // The blob is shared between instantiations of the same template.
    let for_i8 = loader
        .get_function(&LoadingArguments::new("M", 0, args_of(&[&i8t])))
        .unwrap();
    assert!(Arc::ptr_eq(code, for_i8.code.as_ref().unwrap()));
}

#[test]
fn import_constants_are_rewritten() {
    let mut c = Assembly::named("C");
    c.export_constants.push(ExportRecord::new("FOO", 0x1122_3344));

    let mut m = Assembly::named("M");
    m.import_constants.push(ImportRecord::new("C", "FOO"));
    let mut f = FunctionTemplate::default();
    f.generic.types = vec![RefEntry::empty()];
    f.return_type = 0;
    f.instructions = vec![0x01];
    f.constant_data = vec![9, 9];
    // Length 0 marks an import slot; the offset is the import index.
    f.constant_table = vec![ConstantEntry { offset: 0, length: 0 }];
    m.functions.push(f);

    let loader = RuntimeLoader::new(vec![c, m]);
    let f = loader.get_function(&LoadingArguments::plain("M", 0)).unwrap();
    let code = f.code.as_ref().unwrap();
    assert_eq!(code.constant_table[0], ConstantEntry { offset: 2, length: 4 });
    assert_eq!(&code.constant_data, &[9, 9, 0x44, 0x33, 0x22, 0x11]);
    assert_eq!(loader.find_export_constant("C", "FOO"), Some(0x1122_3344));
}

#[test]
fn variadic_segments_match() {
    let mut m = assembly_with_natives("M");
    let mut tuple = value_type();
    tuple.generic.params = SegmentSizes::variadic(1);
    tuple.generic.types = vec![RefEntry::argument(0), RefEntry::argument(1)];
    tuple.fields = vec![0, 1];
    m.types.push(tuple); // id 2

    let loader = RuntimeLoader::new(vec![m]);
    let i32t = loader.add_native_type("M", "I32", 4, 4).unwrap();
    let i8t = loader.add_native_type("M", "I8", 1, 1).unwrap();

    let t = loader.get_type(&request("M", 2, &[&i32t, &i8t])).unwrap();
    assert_eq!(t.size, 8);

    let empty = MultiList::single(vec![]);
    let err = loader
        .get_type(&LoadingArguments::new("M", 2, empty))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Generic);
}

#[test]
fn native_type_validation() {
    let mut m = Assembly::named("M");
    let mut generic = value_type();
    generic.generic.params = SegmentSizes::fixed(1);
    m.types.push(generic); // id 0
    m.types.push(reference_type()); // id 1
    m.types.push(value_type()); // id 2
    m.native_types.push(ExportRecord::new("Generic", 0));
    m.native_types.push(ExportRecord::new("Ref", 1));
    m.native_types.push(ExportRecord::new("Plain", 2));

    let loader = RuntimeLoader::new(vec![m]);
    assert_eq!(
        loader.add_native_type("M", "Missing", 4, 4).unwrap_err().kind(),
        ErrorKind::Link
    );
    assert_eq!(
        loader.add_native_type("M", "Generic", 4, 4).unwrap_err().kind(),
        ErrorKind::Program
    );
    assert_eq!(
        loader.add_native_type("M", "Ref", 4, 4).unwrap_err().kind(),
        ErrorKind::Program
    );
    assert_eq!(
        loader.add_native_type("M", "Plain", 4, 3).unwrap_err().kind(),
        ErrorKind::Program
    );

    let ok = loader.add_native_type("M", "Plain", 4, 4).unwrap();
    assert_eq!(ok.size, 4);
    assert_eq!(
        loader.add_native_type("M", "Plain", 4, 4).unwrap_err().kind(),
        ErrorKind::Program
    );
}

#[test]
fn deterministic_ids_and_layout() {
    fn build() -> (Vec<TypeId>, Vec<(usize, usize)>) {
        let mut m = assembly_with_natives("M");
        let mut pair = value_type();
        pair.generic.params = SegmentSizes::fixed(2);
        pair.generic.types = vec![RefEntry::argument(0), RefEntry::argument(1)];
        pair.fields = vec![0, 1];
        m.types.push(pair);

        let loader = RuntimeLoader::new(vec![m]);
        let i32t = loader.add_native_type("M", "I32", 4, 4).unwrap();
        let i8t = loader.add_native_type("M", "I8", 1, 1).unwrap();
        let pair = loader.get_type(&request("M", 2, &[&i32t, &i8t])).unwrap();
        (
            vec![i32t.id, i8t.id, pair.id],
            pair.fields.iter().map(|f| (f.offset, f.length)).collect(),
        )
    }

    assert_eq!(build(), build());
}

struct RecordingObserver {
    seen: std::sync::mpsc::Sender<u32>,
    fail: bool,
}

impl aster::LoaderObserver for RecordingObserver {
    fn on_type_loaded(&mut self, ty: &RuntimeType) -> Result<(), aster::LoaderError> {
        self.seen.send(ty.id.0).unwrap();
        if self.fail {
            Err(aster::LoaderError::program("rejected by observer"))
        } else {
            Ok(())
        }
    }
}

#[test]
fn failing_observer_keeps_request_atomic() {
    let mut m = Assembly::named("M");
    m.types.push(value_type());

    let loader = RuntimeLoader::new(vec![m]);
    let (tx, rx) = std::sync::mpsc::channel();
    loader.add_observer(Box::new(RecordingObserver { seen: tx, fail: true }));

    let err = loader
        .get_type(&LoadingArguments::plain("M", 0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Program);
    assert_eq!(loader.loaded_type_count(), 0);
    // The hook ran exactly once before the request was discarded.
    assert_eq!(rx.try_iter().count(), 1);
}
