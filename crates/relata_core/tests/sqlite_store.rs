use relata_core::{
    ClientTransaction, CoreError, DomainObject, MappingConfiguration, ObjectState,
    SqlitePersistenceProvider, Value,
};
use std::path::Path;
use std::rc::Rc;

const MAPPING: &str = r#"{
    "classes": [
        {
            "name": "Customer",
            "properties": [{ "name": "Name", "value_type": "text" }],
            "relations": [
                { "name": "Orders", "target_class": "Order", "cardinality": "many",
                  "opposite": "Customer", "sort_expression": "Number desc" }
            ]
        },
        {
            "name": "Order",
            "properties": [
                { "name": "Number", "value_type": "int" },
                { "name": "Paid", "value_type": "bool", "default": { "type": "bool", "value": true } }
            ],
            "relations": [
                { "name": "Customer", "target_class": "Customer", "cardinality": "one",
                  "opposite": "Orders", "mandatory": true }
            ]
        }
    ]
}"#;

fn transaction_at(path: &Path) -> ClientTransaction {
    let mapping = MappingConfiguration::from_json(MAPPING).unwrap();
    let provider = SqlitePersistenceProvider::open(path).unwrap();
    ClientTransaction::new_root(Rc::new(mapping), Rc::new(provider))
}

fn numbers(tx: &ClientTransaction, owner: &DomainObject) -> Vec<Value> {
    tx.related_objects(owner, "Orders")
        .unwrap()
        .iter()
        .map(|item| tx.get_value(item, "Number").unwrap())
        .collect()
}

#[test]
fn committed_graph_reloads_from_a_new_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("objects.db");

    let writer = transaction_at(&path);
    let owner = writer.new_object("Customer").unwrap();
    writer.set_value(&owner, "Name", "Ada").unwrap();
    for number in [2, 3, 1] {
        let item = writer.new_object("Order").unwrap();
        writer.set_value(&item, "Number", number).unwrap();
        writer.add_related(&owner, "Orders", &item).unwrap();
    }
    writer.commit().unwrap();
    drop(writer);

    let reader = transaction_at(&path);
    let owner = reader.get_object(owner.id()).unwrap();
    assert_eq!(reader.get_value(&owner, "Name").unwrap(), Value::from("Ada"));
    assert_eq!(
        numbers(&reader, &owner),
        vec![Value::Int(3), Value::Int(2), Value::Int(1)]
    );
    let first = reader.related_objects(&owner, "Orders").unwrap().remove(0);
    assert_eq!(reader.get_value(&first, "Paid").unwrap(), Value::Bool(true));
    assert_eq!(reader.get_related(&first, "Customer").unwrap(), Some(owner));
}

#[test]
fn stale_writer_is_rejected_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("objects.db");

    let setup = transaction_at(&path);
    let owner = setup.new_object("Customer").unwrap();
    let item = setup.new_object("Order").unwrap();
    setup.set_value(&item, "Number", 1).unwrap();
    setup.set_related(&item, "Customer", Some(&owner)).unwrap();
    setup.commit().unwrap();

    let first = transaction_at(&path);
    let second = transaction_at(&path);
    let mine = first.get_object(item.id()).unwrap();
    let theirs = second.get_object(item.id()).unwrap();

    first.set_value(&mine, "Number", 10).unwrap();
    first.commit().unwrap();
    second.set_value(&theirs, "Number", 20).unwrap();
    assert!(matches!(
        second.commit(),
        Err(CoreError::ConcurrencyViolation(ids)) if ids == vec![item.id().clone()]
    ));
    assert_eq!(second.object_state(&theirs).unwrap(), ObjectState::Changed);

    let check = transaction_at(&path);
    let stored = check.get_object(item.id()).unwrap();
    assert_eq!(check.get_value(&stored, "Number").unwrap(), Value::Int(10));
}

#[test]
fn deleting_and_relinking_updates_reference_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("objects.db");

    let setup = transaction_at(&path);
    let ada = setup.new_object("Customer").unwrap();
    let grace = setup.new_object("Customer").unwrap();
    let moved = setup.new_object("Order").unwrap();
    let dropped = setup.new_object("Order").unwrap();
    for (item, number) in [(&moved, 1), (&dropped, 2)] {
        setup.set_value(item, "Number", number).unwrap();
        setup.add_related(&ada, "Orders", item).unwrap();
    }
    setup.commit().unwrap();

    let tx = transaction_at(&path);
    let ada = tx.get_object(ada.id()).unwrap();
    let grace = tx.get_object(grace.id()).unwrap();
    let moved = tx.get_object(moved.id()).unwrap();
    let dropped = tx.get_object(dropped.id()).unwrap();
    tx.set_related(&moved, "Customer", Some(&grace)).unwrap();
    tx.delete(&dropped).unwrap();
    assert_eq!(tx.object_state(&ada).unwrap(), ObjectState::Changed);
    tx.commit().unwrap();

    let reader = transaction_at(&path);
    let ada = reader.get_object(ada.id()).unwrap();
    let grace = reader.get_object(grace.id()).unwrap();
    assert!(reader.related_objects(&ada, "Orders").unwrap().is_empty());
    assert_eq!(numbers(&reader, &grace), vec![Value::Int(1)]);
    assert!(matches!(
        reader.get_object(dropped.id()),
        Err(CoreError::ObjectsNotFound(ids)) if ids == vec![dropped.id().clone()]
    ));
}

#[test]
fn mandatory_relation_is_checked_before_touching_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("objects.db");

    let tx = transaction_at(&path);
    let orphan = tx.new_object("Order").unwrap();
    assert!(matches!(
        tx.commit(),
        Err(CoreError::MandatoryRelationNotSet { property, .. }) if property == "Customer"
    ));

    let reader = transaction_at(&path);
    assert!(reader.try_get_object(orphan.id()).unwrap().is_none());
}
