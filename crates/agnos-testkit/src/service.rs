//! Server half of the sample service: handlers and the dispatcher.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use agnos_proto::command::{KEY_IDL_MAGIC, KEY_SERVICE_NAME, KEY_SERVICE_VERSION};
use agnos_proto::packers::Packer;
use agnos_proto::{DateTime, HeteroMap, PackedException, ProtocolError, Value};
use agnos_server::processor::{CallContext, DispatchError, Service};
use agnos_server::servers::ServiceFactory;

use crate::{
    CLS_MARTIAL_STATUS, F_CREATE_PERSON, F_ECHO_BUFFER, F_PERSON_DOB, F_PERSON_MARRY,
    F_PERSON_NAME, F_PERSON_SPOUSE, F_SLEEP, F_THINK, IDL_MAGIC, SERVICE_NAME, SERVICE_VERSION,
};

/// A server-resident person.
///
/// The spouse edge is weak: the object table owns the only strong
/// references, so a fully decref'd person disappears even while an
/// ex-spouse still points at them.
pub struct Person {
    name: String,
    date_of_birth: DateTime,
    spouse: Mutex<Weak<Person>>,
}

impl Person {
    fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            date_of_birth: DateTime::now(),
            spouse: Mutex::new(Weak::new()),
        })
    }

    /// The person's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The person's date of birth.
    pub fn date_of_birth(&self) -> DateTime {
        self.date_of_birth
    }

    /// The current spouse, if both are still alive and married.
    pub fn spouse(&self) -> Option<Arc<Person>> {
        self.spouse.lock().unwrap_or_else(PoisonError::into_inner).upgrade()
    }

    /// Marry two persons; either may refuse with a `MartialStatusError`.
    pub fn marry(person: &Arc<Person>, partner: &Arc<Person>) -> Result<(), PackedException> {
        if person.spouse().is_some() {
            return Err(martial_error(format!("{} is already married", person.name)));
        }
        if partner.spouse().is_some() {
            return Err(martial_error(format!("{} is already married", partner.name)));
        }
        if Arc::ptr_eq(person, partner) {
            return Err(martial_error(format!("{} cannot marry themselves", person.name)));
        }
        *person.spouse.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(partner);
        *partner.spouse.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(person);
        Ok(())
    }
}

fn martial_error(message: String) -> PackedException {
    PackedException::new(CLS_MARTIAL_STATUS, Value::Record(vec![Value::Str(message)]))
}

/// The dispatcher a code generator would emit for this service.
pub struct FeatureTestService;

impl FeatureTestService {
    fn person_arg(call: &mut CallContext<'_, '_>) -> Result<Arc<Person>, DispatchError> {
        let obj = call.unpack_proxy()?;
        obj.downcast::<Person>()
            .map_err(|_| ProtocolError::new("object reference is not a person").into())
    }
}

impl Service for FeatureTestService {
    fn invoke(&mut self, funcid: i32, call: &mut CallContext<'_, '_>) -> Result<(), DispatchError> {
        match funcid {
            F_THINK => {
                let a = call.unpack(&Packer::Float)?;
                let b = call.unpack(&Packer::Float)?;
                let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                    return Err(ProtocolError::new("think expects two floats").into());
                };
                if b == 0.0 {
                    return Err(DispatchError::generic(&"division by zero!"));
                }
                call.success()?;
                call.pack(&Packer::Float, &Value::Float(a / b))
            }
            F_CREATE_PERSON => {
                let name = call.unpack(&Packer::Str)?;
                let Some(name) = name.as_str() else {
                    return Err(ProtocolError::new("person name must be a string").into());
                };
                let person = Person::new(name.to_owned());
                call.success()?;
                call.pack_proxy(person)
            }
            F_PERSON_NAME => {
                let person = Self::person_arg(call)?;
                call.success()?;
                call.pack(&Packer::Str, &Value::Str(person.name().to_owned()))
            }
            F_PERSON_DOB => {
                let person = Self::person_arg(call)?;
                call.success()?;
                call.pack(&Packer::Date, &Value::Date(person.date_of_birth()))
            }
            F_PERSON_MARRY => {
                let person = Self::person_arg(call)?;
                let partner = Self::person_arg(call)?;
                Person::marry(&person, &partner)?;
                call.success()
            }
            F_PERSON_SPOUSE => {
                let person = Self::person_arg(call)?;
                let Some(spouse) = person.spouse() else {
                    return Err(martial_error(format!(
                        "{} does not have a spouse",
                        person.name()
                    ))
                    .into());
                };
                call.success()?;
                call.pack_proxy(spouse)
            }
            F_ECHO_BUFFER => {
                let payload = call.unpack(&Packer::Buffer)?;
                call.success()?;
                call.pack(&Packer::Buffer, &payload)
            }
            F_SLEEP => {
                let millis = call.unpack(&Packer::Int32)?;
                let token = call.unpack(&Packer::Int32)?;
                let millis = millis.as_i32().unwrap_or_default().clamp(0, 10_000);
                thread::sleep(Duration::from_millis(millis as u64));
                call.success()?;
                call.pack(&Packer::Int32, &token)
            }
            other => Err(ProtocolError::new(format!("unknown function code: {other}")).into()),
        }
    }

    fn general_info(&self, info: &mut HeteroMap) {
        info.put_str(KEY_SERVICE_NAME, SERVICE_NAME);
        info.put_str(KEY_SERVICE_VERSION, SERVICE_VERSION);
        info.put_str(KEY_IDL_MAGIC, IDL_MAGIC);
    }

    fn functions_info(&self, info: &mut HeteroMap) {
        info.put_str("think", "divide two floats");
        info.put_str("create_person", "create a person and hand out a proxy");
        info.put_str("Person.name", "the person's name");
        info.put_str("Person.date_of_birth", "the person's date of birth");
        info.put_str("Person.marry", "marry two persons");
        info.put_str("Person.spouse", "the person's spouse");
        info.put_str("echo_buffer", "echo a byte buffer");
        info.put_str("sleep", "sleep, then echo the token");
    }

    fn function_codes(&self, info: &mut HeteroMap) {
        info.put_i32("think", F_THINK);
        info.put_i32("create_person", F_CREATE_PERSON);
        info.put_i32("Person.name", F_PERSON_NAME);
        info.put_i32("Person.date_of_birth", F_PERSON_DOB);
        info.put_i32("Person.marry", F_PERSON_MARRY);
        info.put_i32("Person.spouse", F_PERSON_SPOUSE);
        info.put_i32("echo_buffer", F_ECHO_BUFFER);
        info.put_i32("sleep", F_SLEEP);
    }
}

/// One service instance per connection, all sharing the process's persons
/// through the server-wide object table.
pub fn factory() -> Arc<dyn ServiceFactory> {
    Arc::new(|| Box::new(FeatureTestService) as Box<dyn Service>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marriage_rules_are_enforced() {
        let ada = Person::new("ada".into());
        let alan = Person::new("alan".into());
        let grace = Person::new("grace".into());

        Person::marry(&ada, &alan).unwrap();
        assert_eq!(ada.spouse().unwrap().name(), "alan");
        assert_eq!(alan.spouse().unwrap().name(), "ada");

        let err = Person::marry(&grace, &alan).unwrap_err();
        assert_eq!(err.class_id, CLS_MARTIAL_STATUS);
        assert!(grace.spouse().is_none());

        let err = Person::marry(&grace, &grace).unwrap_err();
        assert_eq!(err.class_id, CLS_MARTIAL_STATUS);
    }

    #[test]
    fn spouse_edges_do_not_keep_persons_alive() {
        let ada = Person::new("ada".into());
        let spouse = {
            let alan = Person::new("alan".into());
            Person::marry(&ada, &alan).unwrap();
            ada.spouse().unwrap()
        };
        assert_eq!(spouse.name(), "alan");
        drop(spouse);
        // The only strong reference is gone; the weak edge observes it.
        assert!(ada.spouse().is_none());
    }
}
