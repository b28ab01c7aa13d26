use relata_core::{
    ClassDefinition, ClientTransaction, CoreError, DomainObject, ErrorKind,
    InMemoryPersistenceProvider, ListenerDecision, MappingConfiguration, ObjectId, ObjectState,
    PropertyDefinition, PropertyValues, RelationPropertyDefinition, TransactionListener, Value,
    ValueType,
};
use std::cell::RefCell;
use std::rc::Rc;

fn mapping(mandatory_customer: bool) -> Rc<MappingConfiguration> {
    let mut customer_side = RelationPropertyDefinition::one("Customer", "Customer").with_opposite("Orders");
    if mandatory_customer {
        customer_side = customer_side.mandatory();
    }
    Rc::new(
        MappingConfiguration::build(vec![
            ClassDefinition::new("Customer")
                .with_property(PropertyDefinition::new("Name", ValueType::Text))
                .with_relation(
                    RelationPropertyDefinition::many("Orders", "Order")
                        .with_opposite("Customer")
                        .sorted_by("Number"),
                ),
            ClassDefinition::new("Order")
                .with_property(PropertyDefinition::new("Number", ValueType::Int))
                .with_relation(customer_side),
        ])
        .unwrap(),
    )
}

/// Customer 1 owns orders 1 (Number 7) and 2 (Number 8); customer 2 owns nothing.
fn seeded_provider() -> Rc<InMemoryPersistenceProvider> {
    let provider = InMemoryPersistenceProvider::new();
    provider.seed(customer(1), PropertyValues::new().with_scalar("Name", "Ada"));
    provider.seed(customer(2), PropertyValues::new().with_scalar("Name", "Grace"));
    for (key, number) in [(1, 7), (2, 8)] {
        provider.seed(
            order(key),
            PropertyValues::new()
                .with_scalar("Number", number)
                .with_reference("Customer", Some(customer(1))),
        );
    }
    Rc::new(provider)
}

fn root(provider: &Rc<InMemoryPersistenceProvider>) -> ClientTransaction {
    ClientTransaction::new_root(mapping(false), provider.clone())
}

fn customer(key: i64) -> ObjectId {
    ObjectId::with_int("Customer", key)
}

fn order(key: i64) -> ObjectId {
    ObjectId::with_int("Order", key)
}

fn ids(objects: &[DomainObject]) -> Vec<ObjectId> {
    objects.iter().map(|object| object.id().clone()).collect()
}

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<String>>,
    veto_commit: bool,
}

impl TransactionListener for Recorder {
    fn committing(&self, _tx: &ClientTransaction, objects: &[DomainObject]) -> ListenerDecision {
        self.events
            .borrow_mut()
            .push(format!("committing {}", objects.len()));
        if self.veto_commit {
            return ListenerDecision::veto("not now");
        }
        ListenerDecision::Proceed
    }

    fn committed(&self, _tx: &ClientTransaction, objects: &[DomainObject]) {
        self.events
            .borrow_mut()
            .push(format!("committed {}", objects.len()));
    }

    fn rolling_back(&self, _tx: &ClientTransaction, objects: &[DomainObject]) {
        self.events
            .borrow_mut()
            .push(format!("rolling_back {}", objects.len()));
    }

    fn rolled_back(&self, _tx: &ClientTransaction, objects: &[DomainObject]) {
        self.events
            .borrow_mut()
            .push(format!("rolled_back {}", objects.len()));
    }
}

#[test]
fn commit_persists_new_graph_and_reloads_in_sort_order() {
    let provider = Rc::new(InMemoryPersistenceProvider::new());
    let tx = root(&provider);
    let owner = tx.new_object("Customer").unwrap();
    tx.set_value(&owner, "Name", "Linus").unwrap();
    for number in [30, 10, 20] {
        let item = tx.new_object("Order").unwrap();
        tx.set_value(&item, "Number", number).unwrap();
        tx.set_related(&item, "Customer", Some(&owner)).unwrap();
    }
    assert_eq!(tx.changed_objects().len(), 4);

    tx.commit().unwrap();
    assert_eq!(provider.len(), 4);
    assert_eq!(tx.object_state(&owner).unwrap(), ObjectState::Unchanged);
    assert!(tx.changed_objects().is_empty());

    let reader = root(&provider);
    let reloaded = reader.get_object(owner.id()).unwrap();
    assert_eq!(reader.get_value(&reloaded, "Name").unwrap(), Value::from("Linus"));
    let numbers: Vec<Value> = reader
        .related_objects(&reloaded, "Orders")
        .unwrap()
        .iter()
        .map(|item| reader.get_value(item, "Number").unwrap())
        .collect();
    assert_eq!(numbers, vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
}

#[test]
fn rollback_restores_values_relations_and_discards_new_objects() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let recorder = Rc::new(Recorder::default());
    tx.add_listener(recorder.clone());

    let first = tx.get_object(&order(1)).unwrap();
    let ada = tx.get_object(&customer(1)).unwrap();
    let grace = tx.get_object(&customer(2)).unwrap();
    tx.set_value(&first, "Number", 70).unwrap();
    tx.set_related(&first, "Customer", Some(&grace)).unwrap();
    let fresh = tx.new_object("Order").unwrap();
    tx.add_related(&grace, "Orders", &fresh).unwrap();
    assert_eq!(ids(&tx.related_objects(&ada, "Orders").unwrap()), vec![order(2)]);

    tx.rollback().unwrap();

    assert_eq!(tx.get_value(&first, "Number").unwrap(), Value::Int(7));
    assert_eq!(tx.get_related(&first, "Customer").unwrap(), Some(ada.clone()));
    assert_eq!(
        ids(&tx.related_objects(&ada, "Orders").unwrap()),
        vec![order(1), order(2)]
    );
    assert!(tx.related_objects(&grace, "Orders").unwrap().is_empty());
    assert_eq!(tx.object_state(&fresh).unwrap(), ObjectState::Invalid);
    assert!(matches!(
        tx.get_value(&fresh, "Number"),
        Err(CoreError::ObjectInvalid(id)) if &id == fresh.id()
    ));
    assert!(tx.changed_objects().is_empty());
    assert_eq!(
        *recorder.events.borrow(),
        vec!["rolling_back 4".to_string(), "rolled_back 4".to_string()]
    );
    assert_eq!(provider.stats().saves, 0);
}

#[test]
fn deleted_object_stays_readable_until_commit_then_becomes_invalid() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let ada = tx.get_object(&customer(1)).unwrap();
    let orders = tx.collection(&ada, "Orders").unwrap();
    let first = tx.get_object(&order(1)).unwrap();

    tx.delete(&first).unwrap();
    assert_eq!(tx.object_state(&first).unwrap(), ObjectState::Deleted);
    assert_eq!(tx.get_value(&first, "Number").unwrap(), Value::Int(7));
    assert_eq!(tx.get_related(&first, "Customer").unwrap(), None);
    assert_eq!(ids(&orders.items().unwrap()), vec![order(2)]);
    assert!(matches!(
        tx.set_value(&first, "Number", 1),
        Err(CoreError::ObjectDeleted(_))
    ));
    tx.delete(&first).unwrap();

    tx.commit().unwrap();
    assert_eq!(tx.object_state(&first).unwrap(), ObjectState::Invalid);
    assert!(provider.stored(&order(1)).is_none());

    let reader = root(&provider);
    let ada = reader.get_object(&customer(1)).unwrap();
    assert_eq!(ids(&reader.related_objects(&ada, "Orders").unwrap()), vec![order(2)]);
}

#[test]
fn deleting_a_new_object_makes_it_invalid_immediately() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let ada = tx.get_object(&customer(1)).unwrap();
    let fresh = tx.new_object("Order").unwrap();
    tx.add_related(&ada, "Orders", &fresh).unwrap();

    tx.delete(&fresh).unwrap();
    assert_eq!(tx.object_state(&fresh).unwrap(), ObjectState::Invalid);
    assert!(!tx.collection(&ada, "Orders").unwrap().contains(&fresh).unwrap());
    assert_eq!(tx.object_state(&ada).unwrap(), ObjectState::Unchanged);
}

#[test]
fn deleting_an_owner_unlinks_items_and_rollback_relinks_them() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let ada = tx.get_object(&customer(1)).unwrap();
    let second = tx.get_object(&order(2)).unwrap();

    tx.delete(&ada).unwrap();
    assert_eq!(tx.get_related(&second, "Customer").unwrap(), None);
    assert_eq!(tx.object_state(&second).unwrap(), ObjectState::Changed);

    tx.rollback().unwrap();
    assert_eq!(tx.object_state(&ada).unwrap(), ObjectState::Unchanged);
    assert_eq!(tx.get_related(&second, "Customer").unwrap(), Some(ada));
}

#[test]
fn mandatory_relation_blocks_commit_without_saving() {
    let provider = Rc::new(InMemoryPersistenceProvider::new());
    let tx = ClientTransaction::new_root(mapping(true), provider.clone());
    let fresh = tx.new_object("Order").unwrap();

    let err = tx.commit().unwrap_err();
    assert!(matches!(
        &err,
        CoreError::MandatoryRelationNotSet { object, property }
            if object == fresh.id() && property == "Customer"
    ));
    assert_eq!(err.kind(), ErrorKind::MandatoryRelationViolation);
    assert!(provider.is_empty());
    assert_eq!(tx.object_state(&fresh).unwrap(), ObjectState::New);

    let owner = tx.new_object("Customer").unwrap();
    tx.set_related(&fresh, "Customer", Some(&owner)).unwrap();
    tx.commit().unwrap();
    assert_eq!(provider.len(), 2);
}

#[test]
fn stale_commit_reports_conflict_and_keeps_stored_values() {
    let provider = seeded_provider();
    let first_writer = root(&provider);
    let second_writer = root(&provider);
    let mine = first_writer.get_object(&order(1)).unwrap();
    let theirs = second_writer.get_object(&order(1)).unwrap();

    first_writer.set_value(&mine, "Number", 100).unwrap();
    first_writer.commit().unwrap();

    second_writer.set_value(&theirs, "Number", 200).unwrap();
    let err = second_writer.commit().unwrap_err();
    assert!(matches!(&err, CoreError::ConcurrencyViolation(ids) if ids == &vec![order(1)]));
    assert!(err.is_expected());
    assert!(err.to_string().contains("Order|int:1"));

    let (_, stored) = provider.stored(&order(1)).unwrap();
    assert_eq!(stored.scalar("Number"), Some(&Value::Int(100)));
    assert_eq!(second_writer.object_state(&theirs).unwrap(), ObjectState::Changed);
}

#[test]
fn committing_veto_leaves_changes_pending() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let recorder = Rc::new(Recorder {
        veto_commit: true,
        ..Recorder::default()
    });
    tx.add_listener(recorder.clone());
    let first = tx.get_object(&order(1)).unwrap();
    tx.set_value(&first, "Number", 70).unwrap();

    assert!(matches!(
        tx.commit(),
        Err(CoreError::CancelledByListener { reason }) if reason == "not now"
    ));
    assert_eq!(provider.stats().saves, 0);
    assert_eq!(tx.object_state(&first).unwrap(), ObjectState::Changed);
    assert_eq!(*recorder.events.borrow(), vec!["committing 1".to_string()]);
}

#[test]
fn committed_fires_after_successful_save() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let recorder = Rc::new(Recorder::default());
    tx.add_listener(recorder.clone());
    let first = tx.get_object(&order(1)).unwrap();
    tx.set_value(&first, "Number", 70).unwrap();

    tx.commit().unwrap();
    assert_eq!(
        *recorder.events.borrow(),
        vec!["committing 1".to_string(), "committed 1".to_string()]
    );
    let (timestamp, _) = provider.stored(&order(1)).unwrap();
    assert_eq!(timestamp.0, 2);
}

#[test]
fn sub_transaction_reads_parent_state_as_unchanged() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let first = tx.get_object(&order(1)).unwrap();
    tx.set_value(&first, "Number", 8).unwrap();

    let sub = tx.create_sub_transaction().unwrap();
    assert_eq!(sub.get_value(&first, "Number").unwrap(), Value::Int(8));
    assert_eq!(sub.object_state(&first).unwrap(), ObjectState::Unchanged);
    assert_eq!(tx.object_state(&first).unwrap(), ObjectState::Changed);

    sub.set_value(&first, "Number", 9).unwrap();
    assert_eq!(sub.get_original_value(&first, "Number").unwrap(), Value::Int(8));
    assert_eq!(tx.get_value(&first, "Number").unwrap(), Value::Int(8));
}

#[test]
fn parent_is_read_only_while_sub_transaction_lives() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let first = tx.get_object(&order(1)).unwrap();

    let sub = tx.create_sub_transaction().unwrap();
    assert!(tx.is_read_only());
    assert!(matches!(
        tx.set_value(&first, "Number", 1),
        Err(CoreError::ReadOnlyTransaction)
    ));
    assert!(matches!(tx.commit(), Err(CoreError::ReadOnlyTransaction)));
    assert!(matches!(
        tx.create_sub_transaction(),
        Err(CoreError::InvalidOperation(_))
    ));
    assert_eq!(tx.get_value(&first, "Number").unwrap(), Value::Int(7));

    sub.discard();
    assert!(!tx.is_read_only());
    assert!(sub.is_discarded());
    assert!(matches!(
        sub.get_object(&order(1)),
        Err(CoreError::InvalidOperation(_))
    ));

    let dropped = tx.create_sub_transaction().unwrap();
    drop(dropped);
    assert!(!tx.is_read_only());
    tx.set_value(&first, "Number", 1).unwrap();
}

#[test]
fn discarding_a_middle_transaction_discards_its_child() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let middle = tx.create_sub_transaction().unwrap();
    let inner = middle.create_sub_transaction().unwrap();
    assert!(inner.root().ptr_eq(&tx));

    middle.discard();
    assert!(inner.is_discarded());
    assert!(!tx.is_read_only());
}

#[test]
fn sub_commit_propagates_changes_into_parent() {
    let provider = seeded_provider();
    let tx = root(&provider);
    tx.get_object(&order(1)).unwrap();

    let sub = tx.create_sub_transaction().unwrap();
    let first = sub.get_object(&order(1)).unwrap();
    let ada = sub.get_object(&customer(1)).unwrap();
    sub.set_value(&first, "Number", 70).unwrap();
    let fresh = sub.new_object("Order").unwrap();
    sub.set_value(&fresh, "Number", 9).unwrap();
    sub.add_related(&ada, "Orders", &fresh).unwrap();
    let second = sub.get_object(&order(2)).unwrap();
    sub.delete(&second).unwrap();

    assert_eq!(tx.object_state(&fresh).unwrap(), ObjectState::Invalid);
    assert_eq!(tx.get_value(&first, "Number").unwrap(), Value::Int(7));

    sub.commit().unwrap();
    assert_eq!(sub.object_state(&first).unwrap(), ObjectState::Unchanged);
    assert_eq!(sub.object_state(&second).unwrap(), ObjectState::Invalid);
    sub.discard();

    assert_eq!(tx.object_state(&first).unwrap(), ObjectState::Changed);
    assert_eq!(tx.get_value(&first, "Number").unwrap(), Value::Int(70));
    assert_eq!(tx.object_state(&fresh).unwrap(), ObjectState::New);
    assert_eq!(tx.get_value(&fresh, "Number").unwrap(), Value::Int(9));
    assert_eq!(tx.get_related(&fresh, "Customer").unwrap(), Some(ada.clone()));
    assert_eq!(tx.object_state(&second).unwrap(), ObjectState::Deleted);
    assert_eq!(
        ids(&tx.related_objects(&ada, "Orders").unwrap()),
        vec![order(1), fresh.id().clone()]
    );
    assert_eq!(provider.stats().saves, 0);

    tx.commit().unwrap();
    assert!(provider.stored(&order(2)).is_none());
    let (_, stored) = provider.stored(fresh.id()).unwrap();
    assert_eq!(stored.reference("Customer"), Some(&customer(1)));
    assert_eq!(tx.object_state(&second).unwrap(), ObjectState::Invalid);
}

#[test]
fn sub_rollback_leaves_parent_untouched() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let sub = tx.create_sub_transaction().unwrap();
    let first = sub.get_object(&order(1)).unwrap();
    sub.set_value(&first, "Number", 70).unwrap();
    let fresh = sub.new_object("Order").unwrap();

    sub.rollback().unwrap();
    assert_eq!(sub.get_value(&first, "Number").unwrap(), Value::Int(7));
    assert_eq!(sub.object_state(&fresh).unwrap(), ObjectState::Invalid);
    assert_eq!(tx.object_state(&first).unwrap(), ObjectState::Unchanged);
    assert!(tx.changed_objects().is_empty());
}

#[test]
fn objects_deleted_in_parent_are_invalid_in_sub() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let second = tx.get_object(&order(2)).unwrap();
    tx.delete(&second).unwrap();
    let fresh = tx.new_object("Order").unwrap();

    let sub = tx.create_sub_transaction().unwrap();
    assert_eq!(sub.object_state(&second).unwrap(), ObjectState::Invalid);
    assert!(matches!(
        sub.get_value(&second, "Number"),
        Err(CoreError::ObjectInvalid(_))
    ));

    assert_eq!(sub.object_state(&fresh).unwrap(), ObjectState::NotLoadedYet);
    assert_eq!(sub.get_value(&fresh, "Number").unwrap(), Value::Int(0));
    assert_eq!(sub.object_state(&fresh).unwrap(), ObjectState::Unchanged);
}

#[test]
fn touched_flags_propagate_without_changing_state() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let first = tx.get_object(&order(1)).unwrap();
    let ada = tx.get_object(&customer(1)).unwrap();

    let sub = tx.create_sub_transaction().unwrap();
    sub.touch_value(&first, "Number").unwrap();
    sub.touch_relation(&ada, "Orders").unwrap();
    assert_eq!(sub.object_state(&first).unwrap(), ObjectState::Unchanged);
    assert!(sub.is_touched(&first, "Number").unwrap());
    assert!(!tx.is_touched(&first, "Number").unwrap());

    sub.commit().unwrap();
    sub.discard();
    assert!(tx.is_touched(&first, "Number").unwrap());
    assert!(tx.is_touched(&ada, "Orders").unwrap());
    assert_eq!(tx.object_state(&first).unwrap(), ObjectState::Unchanged);
    assert_eq!(tx.object_state(&ada).unwrap(), ObjectState::Unchanged);
}

#[test]
fn scoped_domain_object_calls_use_current_transaction() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let first = tx.get_object(&order(1)).unwrap();

    {
        let scope = tx.enter_scope();
        assert!(scope.transaction().ptr_eq(&tx));
        first.set_value("Number", 8).unwrap();
        assert_eq!(first.value("Number").unwrap(), Value::Int(8));
        assert_eq!(first.state().unwrap(), ObjectState::Changed);

        let owner = first.related("Customer").unwrap().unwrap();
        assert_eq!(owner.collection("Orders").unwrap().len().unwrap(), 2);
        first.set_related("Customer", None).unwrap();
        assert_eq!(owner.collection("Orders").unwrap().len().unwrap(), 1);
    }

    assert!(matches!(
        first.value("Number"),
        Err(CoreError::InvalidOperation(_))
    ));
    assert_eq!(tx.get_related(&first, "Customer").unwrap(), None);
}

#[derive(Default)]
struct LoadCounter {
    loaded: RefCell<Vec<ObjectId>>,
    subs: RefCell<Vec<ClientTransaction>>,
}

impl TransactionListener for LoadCounter {
    fn objects_loaded(&self, _tx: &ClientTransaction, objects: &[DomainObject]) {
        self.loaded.borrow_mut().extend(ids(objects));
    }

    fn sub_transaction_created(&self, _tx: &ClientTransaction, sub: &ClientTransaction) {
        self.subs.borrow_mut().push(sub.clone());
    }
}

#[test]
fn batch_load_reports_every_missing_id_and_registers_nothing() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let counter = Rc::new(LoadCounter::default());
    tx.add_listener(counter.clone());

    let err = tx
        .get_objects(&[order(1), order(98), customer(1), order(99)])
        .unwrap_err();
    assert!(matches!(err, CoreError::ObjectsNotFound(ref missing) if *missing == vec![order(98), order(99)]));
    assert_eq!(provider.stats().batch_loads, 1);
    assert!(counter.loaded.borrow().is_empty());
    assert!(!tx.is_enlisted(&DomainObject::new(order(1))));
    assert!(matches!(
        tx.object_state(&DomainObject::new(customer(1))),
        Err(CoreError::CrossTransaction { .. })
    ));

    provider.reset_stats();
    let loaded = tx.get_objects(&[order(1), customer(1)]).unwrap();
    assert_eq!(ids(&loaded), vec![order(1), customer(1)]);
    assert_eq!(provider.stats().batch_loads, 1);
    assert_eq!(provider.stats().single_loads, 0);
    assert_eq!(*counter.loaded.borrow(), vec![order(1), customer(1)]);
    assert_eq!(tx.object_state(&loaded[0]).unwrap(), ObjectState::Unchanged);
}

#[test]
fn creating_a_sub_transaction_notifies_the_parent_listeners() {
    let provider = seeded_provider();
    let tx = root(&provider);
    let counter = Rc::new(LoadCounter::default());
    tx.add_listener(counter.clone());

    let sub = tx.create_sub_transaction().unwrap();
    assert_eq!(counter.subs.borrow().len(), 1);
    assert_eq!(counter.subs.borrow()[0].id(), sub.id());
    assert_eq!(sub.parent().map(|parent| parent.id()), Some(tx.id()));

    sub.discard();
    let again = tx.create_sub_transaction().unwrap();
    let seen: Vec<_> = counter.subs.borrow().iter().map(ClientTransaction::id).collect();
    assert_eq!(seen, vec![sub.id(), again.id()]);
}
