use relata_core::{
    ClassDefinition, ClientTransaction, CollectionEventHandler, CoreError, DomainObject,
    ErrorKind, InMemoryPersistenceProvider, ListenerDecision, MappingConfiguration, ObjectId,
    ObjectState, PropertyDefinition, PropertyValues, RelationChange, RelationChangeKind,
    RelationEndPoint, RelationEndPointId, RelationPropertyDefinition, TransactionListener,
    ValueType,
};
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn mapping() -> Rc<MappingConfiguration> {
    Rc::new(
        MappingConfiguration::build(vec![
            ClassDefinition::new("Employee")
                .with_property(PropertyDefinition::new("Name", ValueType::Text))
                .with_relation(
                    RelationPropertyDefinition::one("Supervisor", "Employee")
                        .with_opposite("Subordinates"),
                )
                .with_relation(
                    RelationPropertyDefinition::many("Subordinates", "Employee")
                        .with_opposite("Supervisor")
                        .sorted_by("Name"),
                ),
            ClassDefinition::new("Customer")
                .with_property(PropertyDefinition::new("Name", ValueType::Text))
                .with_relation(
                    RelationPropertyDefinition::many("Orders", "Order")
                        .with_opposite("Customer")
                        .sorted_by("Number"),
                ),
            ClassDefinition::new("SpecialCustomer").extends("Customer"),
            ClassDefinition::new("Order")
                .with_property(PropertyDefinition::new("Number", ValueType::Int))
                .with_relation(
                    RelationPropertyDefinition::one("Customer", "Customer").with_opposite("Orders"),
                )
                .with_relation(
                    RelationPropertyDefinition::one("Ticket", "OrderTicket")
                        .with_opposite("Order")
                        .virtual_side(),
                ),
            ClassDefinition::new("OrderTicket")
                .with_property(PropertyDefinition::new("Code", ValueType::Text))
                .with_relation(
                    RelationPropertyDefinition::one("Order", "Order").with_opposite("Ticket"),
                ),
            ClassDefinition::new("Product")
                .with_property(PropertyDefinition::new("Name", ValueType::Text)),
        ])
        .unwrap(),
    )
}

fn employee(key: i64) -> ObjectId {
    ObjectId::with_int("Employee", key)
}

fn customer(key: i64) -> ObjectId {
    ObjectId::with_int("Customer", key)
}

fn order(key: i64) -> ObjectId {
    ObjectId::with_int("Order", key)
}

fn ticket(key: i64) -> ObjectId {
    ObjectId::with_int("OrderTicket", key)
}

fn setup() -> (Rc<InMemoryPersistenceProvider>, ClientTransaction) {
    let provider = Rc::new(InMemoryPersistenceProvider::new());
    let tx = ClientTransaction::new_root(mapping(), provider.clone());
    (provider, tx)
}

/// Customer 1 owns orders 1..=3 with numbers 3, 1, 2.
fn seed_customer_with_orders(provider: &InMemoryPersistenceProvider) {
    provider.seed(customer(1), PropertyValues::new().with_scalar("Name", "Ada"));
    for (key, number) in [(1, 3), (2, 1), (3, 2)] {
        provider.seed(
            order(key),
            PropertyValues::new()
                .with_scalar("Number", number)
                .with_reference("Customer", Some(customer(1))),
        );
    }
}

fn describe(change: &RelationChange) -> String {
    let end_point = format!("{}.{}", change.object, change.property);
    match &change.kind {
        RelationChangeKind::Set {
            old_related,
            new_related,
        } => format!(
            "{end_point} set {}->{}",
            old_related.as_ref().map_or("none".to_string(), ToString::to_string),
            new_related.as_ref().map_or("none".to_string(), ToString::to_string)
        ),
        RelationChangeKind::Add { item, index } => format!("{end_point} add {item} at {index}"),
        RelationChangeKind::Remove { item, index } => {
            format!("{end_point} remove {item} at {index}")
        }
    }
}

struct RelationRecorder {
    log: Log,
}

impl TransactionListener for RelationRecorder {
    fn relation_changing(&self, _tx: &ClientTransaction, change: &RelationChange) -> ListenerDecision {
        self.log
            .borrow_mut()
            .push(format!("changing {}", describe(change)));
        ListenerDecision::Proceed
    }

    fn relation_changed(&self, _tx: &ClientTransaction, change: &RelationChange) {
        self.log
            .borrow_mut()
            .push(format!("changed {}", describe(change)));
    }
}

struct CollectionRecorder {
    name: &'static str,
    log: Log,
}

impl CollectionEventHandler for CollectionRecorder {
    fn adding(&self, item: &DomainObject, index: usize) -> ListenerDecision {
        self.log
            .borrow_mut()
            .push(format!("{} adding {item} at {index}", self.name));
        ListenerDecision::Proceed
    }

    fn added(&self, item: &DomainObject, index: usize) {
        self.log
            .borrow_mut()
            .push(format!("{} added {item} at {index}", self.name));
    }

    fn removing(&self, item: &DomainObject, index: usize) -> ListenerDecision {
        self.log
            .borrow_mut()
            .push(format!("{} removing {item} at {index}", self.name));
        ListenerDecision::Proceed
    }

    fn removed(&self, item: &DomainObject, index: usize) {
        self.log
            .borrow_mut()
            .push(format!("{} removed {item} at {index}", self.name));
    }
}

#[test]
fn adding_subordinate_moves_it_between_supervisors() {
    let (provider, tx) = setup();
    provider.seed(employee(1), PropertyValues::new().with_scalar("Name", "Old boss"));
    provider.seed(employee(2), PropertyValues::new().with_scalar("Name", "New boss"));
    provider.seed(
        employee(3),
        PropertyValues::new()
            .with_scalar("Name", "Worker")
            .with_reference("Supervisor", Some(employee(1))),
    );

    let new_boss = tx.get_object(&employee(2)).unwrap();
    let worker = tx.get_object(&employee(3)).unwrap();
    let old_boss = tx.get_related(&worker, "Supervisor").unwrap().unwrap();
    assert_eq!(old_boss.id(), &employee(1));

    let log: Log = Rc::default();
    let old_subordinates = tx.collection(&old_boss, "Subordinates").unwrap();
    old_subordinates.add_handler(Rc::new(CollectionRecorder {
        name: "old",
        log: log.clone(),
    }));
    let new_subordinates = tx.collection(&new_boss, "Subordinates").unwrap();
    new_subordinates.add_handler(Rc::new(CollectionRecorder {
        name: "new",
        log: log.clone(),
    }));
    tx.add_listener(Rc::new(RelationRecorder { log: log.clone() }));

    new_subordinates.add(&worker).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![
            "changing Employee|int:3.Supervisor set Employee|int:1->Employee|int:2",
            "changing Employee|int:1.Subordinates remove Employee|int:3 at 0",
            "old removing Employee|int:3 at 0",
            "changing Employee|int:2.Subordinates add Employee|int:3 at 0",
            "new adding Employee|int:3 at 0",
            "changed Employee|int:3.Supervisor set Employee|int:1->Employee|int:2",
            "changed Employee|int:1.Subordinates remove Employee|int:3 at 0",
            "old removed Employee|int:3 at 0",
            "changed Employee|int:2.Subordinates add Employee|int:3 at 0",
            "new added Employee|int:3 at 0",
        ]
    );
    assert_eq!(tx.get_related(&worker, "Supervisor").unwrap(), Some(new_boss.clone()));
    assert!(!old_subordinates.contains(&worker).unwrap());
    assert!(new_subordinates.contains(&worker).unwrap());
    assert_eq!(tx.object_state(&old_boss).unwrap(), ObjectState::Changed);
    assert_eq!(tx.object_state(&new_boss).unwrap(), ObjectState::Changed);
    assert_eq!(tx.object_state(&worker).unwrap(), ObjectState::Changed);
}

#[test]
fn one_to_one_assignment_releases_both_previous_partners() {
    let (provider, tx) = setup();
    provider.seed(order(1), PropertyValues::new().with_scalar("Number", 1));
    provider.seed(order(2), PropertyValues::new().with_scalar("Number", 2));
    provider.seed(
        ticket(10),
        PropertyValues::new().with_reference("Order", Some(order(1))),
    );
    provider.seed(
        ticket(20),
        PropertyValues::new().with_reference("Order", Some(order(2))),
    );

    let first = tx.get_object(&order(1)).unwrap();
    let second_ticket = tx.get_object(&ticket(20)).unwrap();
    tx.set_related(&first, "Ticket", Some(&second_ticket)).unwrap();

    let first_ticket = tx.get_object(&ticket(10)).unwrap();
    let second = tx.get_object(&order(2)).unwrap();
    assert_eq!(tx.get_related(&first, "Ticket").unwrap(), Some(second_ticket.clone()));
    assert_eq!(tx.get_related(&second_ticket, "Order").unwrap(), Some(first.clone()));
    assert_eq!(tx.get_related(&first_ticket, "Order").unwrap(), None);
    assert_eq!(tx.get_related(&second, "Ticket").unwrap(), None);
    assert_eq!(
        tx.get_original_related(&first, "Ticket").unwrap(),
        Some(first_ticket.clone())
    );
    assert_eq!(tx.object_state(&second).unwrap(), ObjectState::Changed);
}

#[test]
fn reassigning_current_value_only_touches() {
    let (provider, tx) = setup();
    seed_customer_with_orders(&provider);
    let order = tx.get_object(&order(1)).unwrap();
    let current = tx.get_related(&order, "Customer").unwrap();

    let log: Log = Rc::default();
    tx.add_listener(Rc::new(RelationRecorder { log: log.clone() }));
    tx.set_related(&order, "Customer", current.as_ref()).unwrap();

    assert!(log.borrow().is_empty());
    assert_eq!(tx.object_state(&order).unwrap(), ObjectState::Unchanged);
    assert!(tx.is_touched(&order, "Customer").unwrap());
}

#[test]
fn adding_the_same_object_twice_fails() {
    let (_provider, tx) = setup();
    let customer = tx.new_object("Customer").unwrap();
    let order = tx.new_object("Order").unwrap();
    let orders = tx.collection(&customer, "Orders").unwrap();

    orders.add(&order).unwrap();
    let err = orders.add(&order).unwrap_err();

    assert!(matches!(err, CoreError::DuplicateInCollection { ref object } if object == order.id()));
    assert_eq!(orders.len().unwrap(), 1);
    assert_eq!(tx.get_related(&order, "Customer").unwrap(), Some(customer));
}

#[test]
fn incompatible_objects_are_rejected_with_context() {
    let (_provider, tx) = setup();
    let customer = tx.new_object("Customer").unwrap();
    let special = tx.new_object("SpecialCustomer").unwrap();
    let order = tx.new_object("Order").unwrap();
    let product = tx.new_object("Product").unwrap();

    let err = tx.add_related(&customer, "Orders", &product).unwrap_err();
    match err {
        CoreError::TypeMismatch {
            owner,
            property,
            offending,
            ..
        } => {
            assert_eq!(owner.as_ref(), Some(customer.id()));
            assert_eq!(property.as_deref(), Some("Orders"));
            assert_eq!(offending.as_ref(), Some(product.id()));
        }
        other => panic!("unexpected error: {other}"),
    }
    let err = tx.set_related(&order, "Customer", Some(&product)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);

    tx.set_related(&order, "Customer", Some(&special)).unwrap();
    assert_eq!(tx.related_objects(&special, "Orders").unwrap(), vec![order]);
}

#[test]
fn objects_of_another_hierarchy_are_rejected() {
    let (provider, first) = setup();
    let second = ClientTransaction::new_root(mapping(), provider);
    let foreign = first.new_object("Order").unwrap();
    let local = second.new_object("Customer").unwrap();

    let err = second.get_value(&foreign, "Number").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTransaction);
    let err = second.add_related(&local, "Orders", &foreign).unwrap_err();
    assert!(matches!(err, CoreError::CrossTransaction { ref object } if object == foreign.id()));

    second.enlist(&DomainObject::new(order(99))).unwrap_err();
}

#[test]
fn collection_loads_once_in_persisted_order() {
    let (provider, tx) = setup();
    seed_customer_with_orders(&provider);
    let owner = tx.get_object(&customer(1)).unwrap();
    provider.reset_stats();

    let orders = tx.collection(&owner, "Orders").unwrap();
    assert_eq!(provider.stats().related_loads, 0);

    assert_eq!(orders.len().unwrap(), 3);
    assert!(orders.contains(&DomainObject::new(order(1))).unwrap());
    let ids: Vec<ObjectId> = orders
        .items()
        .unwrap()
        .into_iter()
        .map(|item| item.id().clone())
        .collect();
    assert_eq!(ids, vec![order(2), order(3), order(1)]);
    assert_eq!(provider.stats().related_loads, 1);
    assert!(tx.collection(&owner, "Orders").unwrap().ptr_eq(&orders));
}

#[test]
fn loading_a_foreign_key_discovers_the_opposite_side() {
    let (provider, tx) = setup();
    seed_customer_with_orders(&provider);
    let owner = tx.get_object(&customer(1)).unwrap();
    tx.get_object(&order(3)).unwrap();

    let end_point_id = RelationEndPointId::new(owner.id().clone(), "Orders");
    let end_point = tx.get_end_point(&end_point_id, false).unwrap().unwrap();
    assert!(!end_point.is_data_complete());
    assert_eq!(end_point.related_ids(), vec![order(3)]);

    let end_point = tx.get_end_point(&end_point_id, true).unwrap().unwrap();
    assert!(end_point.is_data_complete());
    assert_eq!(end_point.related_ids(), vec![order(2), order(3), order(1)]);

    let real = tx
        .get_end_point(&RelationEndPointId::new(order(3), "Customer"), false)
        .unwrap()
        .unwrap();
    assert!(matches!(real, RelationEndPoint::RealObject { current: Some(ref id), .. } if id == owner.id()));
}

#[test]
fn positional_changes_keep_foreign_keys_in_sync() {
    let (provider, tx) = setup();
    seed_customer_with_orders(&provider);
    let owner = tx.get_object(&customer(1)).unwrap();
    let orders = tx.collection(&owner, "Orders").unwrap();
    let first = orders.get(0).unwrap().unwrap();
    let second = orders.get(1).unwrap().unwrap();
    let fresh = tx.new_object("Order").unwrap();

    orders.insert(1, &fresh).unwrap();
    assert_eq!(orders.index_of(&fresh).unwrap(), Some(1));
    assert_eq!(tx.get_related(&fresh, "Customer").unwrap(), Some(owner.clone()));
    let err = orders.insert(9, &DomainObject::new(order(99))).unwrap_err();
    assert!(matches!(err, CoreError::CrossTransaction { .. }));

    orders.remove_at(0).unwrap();
    assert_eq!(tx.get_related(&first, "Customer").unwrap(), None);
    assert_eq!(orders.get(0).unwrap(), Some(fresh.clone()));

    assert!(orders.remove(&second).unwrap());
    assert!(!orders.remove(&second).unwrap());
    assert_eq!(tx.get_related(&second, "Customer").unwrap(), None);

    let err = orders.insert(5, &first).unwrap_err();
    assert!(matches!(err, CoreError::IndexOutOfRange { index: 5, len: 2 }));

    orders.replace(0, Some(&first)).unwrap();
    assert_eq!(tx.get_related(&first, "Customer").unwrap(), Some(owner.clone()));
    assert_eq!(tx.get_related(&fresh, "Customer").unwrap(), None);

    let remaining = orders.items().unwrap();
    orders.clear().unwrap();
    assert!(orders.is_empty().unwrap());
    for item in remaining {
        assert_eq!(tx.get_related(&item, "Customer").unwrap(), None);
    }
    assert_eq!(
        tx.original_related_objects(&owner, "Orders").unwrap().len(),
        3
    );
}

#[test]
fn assigning_a_collection_swaps_the_associated_instance() {
    let (provider, tx) = setup();
    seed_customer_with_orders(&provider);
    let owner = tx.get_object(&customer(1)).unwrap();
    let previous = tx.collection(&owner, "Orders").unwrap();
    let kept = tx.get_object(&order(2)).unwrap();
    let dropped = tx.get_object(&order(1)).unwrap();
    let added = tx.new_object("Order").unwrap();
    let before = previous.items().unwrap();

    let replacement = tx.new_collection("Order").unwrap();
    replacement.add(&added).unwrap();
    replacement.add(&kept).unwrap();
    tx.set_collection(&owner, "Orders", &replacement).unwrap();

    assert!(replacement.is_associated());
    assert_eq!(replacement.items().unwrap(), vec![added.clone(), kept.clone()]);
    assert!(tx.collection(&owner, "Orders").unwrap().ptr_eq(&replacement));
    assert!(!previous.is_associated());
    assert_eq!(previous.items().unwrap(), before);
    assert_eq!(tx.get_related(&added, "Customer").unwrap(), Some(owner.clone()));
    assert_eq!(tx.get_related(&dropped, "Customer").unwrap(), None);

    tx.set_collection(&owner, "Orders", &replacement).unwrap();
    let err = tx
        .set_collection(&owner, "Orders", &replacement.as_read_only())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    let other = tx.new_object("Customer").unwrap();
    let err = tx.set_collection(&other, "Orders", &replacement).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn read_only_collections_change_only_through_the_foreign_key() {
    let mapping = Rc::new(
        MappingConfiguration::build(vec![
            ClassDefinition::new("Folder").with_relation(
                RelationPropertyDefinition::many("Files", "File")
                    .with_opposite("Folder")
                    .read_only(),
            ),
            ClassDefinition::new("File").with_relation(
                RelationPropertyDefinition::one("Folder", "Folder").with_opposite("Files"),
            ),
        ])
        .unwrap(),
    );
    let tx = ClientTransaction::new_root(mapping, Rc::new(InMemoryPersistenceProvider::new()));
    let folder = tx.new_object("Folder").unwrap();
    let file = tx.new_object("File").unwrap();
    let files = tx.collection(&folder, "Files").unwrap();

    assert!(files.is_read_only());
    let err = files.add(&file).unwrap_err();
    assert!(matches!(err, CoreError::NotSupported(ref message) if message.contains("insert into")));
    let err = tx.add_related(&folder, "Files", &file).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);

    tx.set_related(&file, "Folder", Some(&folder)).unwrap();
    assert_eq!(files.items().unwrap(), vec![file]);
}

#[test]
fn moving_several_items_from_one_owner_reports_current_positions() {
    let (provider, tx) = setup();
    seed_customer_with_orders(&provider);
    let ada = tx.get_object(&customer(1)).unwrap();
    let grace = tx.new_object("Customer").unwrap();
    let first = tx.get_object(&order(2)).unwrap();
    let second = tx.get_object(&order(3)).unwrap();

    let log: Log = Rc::default();
    let ada_orders = tx.collection(&ada, "Orders").unwrap();
    ada_orders.add_handler(Rc::new(CollectionRecorder {
        name: "ada",
        log: log.clone(),
    }));
    tx.add_listener(Rc::new(RelationRecorder { log: log.clone() }));

    let replacement = tx.new_collection("Order").unwrap();
    replacement.add(&first).unwrap();
    replacement.add(&second).unwrap();
    tx.set_collection(&grace, "Orders", &replacement).unwrap();

    let removals: Vec<String> = log
        .borrow()
        .iter()
        .filter(|entry| entry.contains("remov"))
        .cloned()
        .collect();
    assert_eq!(
        removals,
        vec![
            "changing Customer|int:1.Orders remove Order|int:2 at 0",
            "ada removing Order|int:2 at 0",
            "changing Customer|int:1.Orders remove Order|int:3 at 0",
            "ada removing Order|int:3 at 0",
            "changed Customer|int:1.Orders remove Order|int:2 at 0",
            "ada removed Order|int:2 at 0",
            "changed Customer|int:1.Orders remove Order|int:3 at 0",
            "ada removed Order|int:3 at 0",
        ]
    );
    assert_eq!(ada_orders.items().unwrap(), vec![DomainObject::new(order(1))]);
    assert_eq!(tx.get_related(&second, "Customer").unwrap(), Some(grace));
}

#[test]
fn cloning_an_associated_collection_detaches_the_copy() {
    let (provider, tx) = setup();
    seed_customer_with_orders(&provider);
    let owner = tx.get_object(&customer(1)).unwrap();
    let orders = tx.collection(&owner, "Orders").unwrap();
    let copy = orders.clone_collection().unwrap();
    let before = orders.items().unwrap();

    assert!(orders.is_associated());
    assert!(!copy.is_associated());
    assert_eq!(copy.items().unwrap(), before);

    let dropped = tx.get_object(&order(1)).unwrap();
    tx.set_related(&dropped, "Customer", None).unwrap();
    let added = tx.new_object("Order").unwrap();
    orders.add(&added).unwrap();
    assert_eq!(orders.len().unwrap(), 3);
    assert!(!orders.contains(&dropped).unwrap());
    assert_eq!(copy.items().unwrap(), before);

    let extra = tx.new_object("Order").unwrap();
    copy.add(&extra).unwrap();
    assert_eq!(tx.get_related(&extra, "Customer").unwrap(), None);
    assert!(!orders.contains(&extra).unwrap());
}
