use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one and inject
/// dependencies.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// `crate::store::MemoryStore`, `crate::clock::ManualClock` and
/// `crate::fixtures::Fixture`. All of them share one fresh in-memory store
/// and one manual clock. Pass `seeded` to seed the example fixture without
/// injecting it; injecting it always seeds it.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let (test_args, wants_fixture) = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    let seeded = match parse_macro_input!(args as Option<Ident>) {
        Some(arg) if arg == "seeded" => true,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `seeded` or nothing")
                .into_compile_error()
                .into();
        }
        None => false,
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let maybe_seed = if seeded || wants_fixture {
        quote! {
            #[allow(unused_variables)]
            let fixture = crate::fixtures::Fixture::seed(&store, &clock);
        }
    } else {
        quote! {}
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                // Test setup.
                let store = crate::store::MemoryStore::new();
                let clock = crate::clock::ManualClock::default();
                #maybe_seed
                #[allow(unused_variables)]
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_store(
                        rocket::Config::figment(),
                        std::sync::Arc::new(store.clone()),
                        std::sync::Arc::new(clock.clone()),
                    ),
                )
                .await
                .unwrap();

                #new_name(#(#test_args),*).await;
            });
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<(Vec<TokenStream2>, bool), syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen = vec![];
    let mut args = vec![];
    let mut wants_fixture = false;

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    // The last path segment names the type, however it is qualified.
                    if let Some(segment) = type_path.path.segments.last() {
                        let type_ident = segment.ident.to_string();
                        let arg = match type_ident.as_str() {
                            "Client" => Some(quote! { rocket_client }),
                            "MemoryStore" => Some(quote! { store.clone() }),
                            "ManualClock" => Some(quote! { clock.clone() }),
                            "Fixture" => {
                                wants_fixture = true;
                                Some(quote! { fixture.clone() })
                            }
                            _ => None,
                        };
                        if let Some(arg) = arg {
                            if seen.contains(&type_ident) {
                                return Err(syn::Error::new(
                                    input.span(),
                                    format!("Test cannot accept more than one `{type_ident}`"),
                                ));
                            }
                            seen.push(type_ident);
                            args.push(arg);
                            continue;
                        }
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client: Client`, `store: MemoryStore`, `clock: ManualClock` or `fixture: Fixture`",
        ));
    }

    Ok((args, wants_fixture))
}
